//! # Demand Scorer
//! Maps per-hexagon population figures to a saturating suitability score in
//! `[0, 20)`. Capacity scales with catchment area, so the same head count
//! scores lower in a larger catchment.
//!
//! `score = 20 * p / (p + scaled_max)`, rounded to 3 decimals.

use tracing::debug;

/// Upper (exclusive) bound of every demand score.
pub const MAX_SCORE: f64 = 20.0;

/// Catchment disk area in km².
pub fn catchment_area_km2(radius_m: f64) -> f64 {
    std::f64::consts::PI * radius_m * radius_m / 1e6
}

/// Saturation threshold for a catchment: `ceil(base * area_km2)`.
pub fn scaled_max_for_radius(radius_m: f64, base_max_per_km2: f64) -> f64 {
    (base_max_per_km2 * catchment_area_km2(radius_m)).ceil()
}

fn effective_max(radius_m: f64, base_max_per_km2: f64) -> f64 {
    let scaled = scaled_max_for_radius(radius_m, base_max_per_km2);
    if scaled > 0.0 {
        scaled
    } else {
        base_max_per_km2
    }
}

/// Score one population figure against an already-resolved capacity.
/// Negative or non-finite figures are treated as unknown.
pub fn score_one(population: Option<f64>, capacity: f64) -> Option<f64> {
    let p = population.filter(|p| p.is_finite() && *p >= 0.0)?;
    if p == 0.0 {
        return Some(0.0);
    }
    let raw = MAX_SCORE * (p / (p + capacity));
    Some((raw * 1000.0).round() / 1000.0)
}

/// Score every population, index-aligned with the input. Absent stays absent.
pub fn score(populations: &[Option<f64>], radius_m: f64, base_max_per_km2: f64) -> Vec<Option<f64>> {
    let capacity = effective_max(radius_m, base_max_per_km2);
    debug!(
        target: "catchment",
        capacity,
        radius_m,
        base_max_per_km2,
        "demand capacity resolved"
    );
    populations.iter().map(|p| score_one(*p, capacity)).collect()
}
