//! # Catchment Orchestration
//! Settings lookup → hexagon grid → sequential enrichment → demand scores.
//!
//! Only invalid inputs abort a run. Per-hexagon enrichment failures come back
//! as absent populations and absent scores at the same index.

use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing::info;

use crate::config::{CatchmentSettings, CatchmentSettingsTable};
use crate::demand;
use crate::enrich::batch::{enrich_all, EnrichmentResult};
use crate::enrich::Enricher;
use crate::geo::{hexgrid, Ring};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CatchmentError {
    #[error("invalid catchment input: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Default)]
pub struct CatchmentRequest {
    pub radius: f64,
    pub center_lon: f64,
    pub center_lat: f64,
    pub category: Option<String>,
    pub token: String,
    /// First-N truncation in generator order; `Some(0)` means no limit.
    pub max_hexagons: Option<usize>,
    pub return_responses: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatchmentOutput {
    pub hexagons: Vec<Ring>,
    pub pops: Vec<Option<f64>>,
    pub number_of_hexagons: usize,
    pub demand_scores: Vec<Option<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_responses: Option<Vec<EnrichmentResult>>,
    pub settings: CatchmentSettings,
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("catchment_runs_total", "Completed catchment runs.");
        describe_histogram!("catchment_hexagons", "Hexagons enriched per catchment run.");
        describe_histogram!("catchment_run_ms", "Catchment run duration in milliseconds.");
    });
}

fn validate(req: &CatchmentRequest) -> Result<(), CatchmentError> {
    for (name, v) in [
        ("radius", req.radius),
        ("center_x", req.center_lon),
        ("center_y", req.center_lat),
    ] {
        if !v.is_finite() {
            return Err(CatchmentError::Validation(format!("{name} must be a finite number")));
        }
    }
    if req.radius < 0.0 {
        return Err(CatchmentError::Validation("radius must not be negative".into()));
    }
    Ok(())
}

/// Rejects catchments whose grid would exceed `max_cells` before anything is allocated.
fn check_grid_size(radius: f64, side_length: f64, max_cells: usize) -> Result<(), CatchmentError> {
    let estimate = hexgrid::estimated_cells(radius, side_length);
    if estimate > max_cells as f64 {
        return Err(CatchmentError::Validation(format!(
            "radius {radius} m with {side_length} m hexagons needs ~{estimate:.0} cells (limit {max_cells})"
        )));
    }
    Ok(())
}

/// Run one catchment analysis end to end.
pub async fn run(
    req: &CatchmentRequest,
    table: &CatchmentSettingsTable,
    enricher: &dyn Enricher,
) -> Result<CatchmentOutput, CatchmentError> {
    ensure_metrics_described();
    validate(req)?;
    let t0 = Instant::now();

    let settings = table.resolve(req.category.as_deref());
    check_grid_size(req.radius, settings.side_length, table.max_grid_cells())?;
    let mut hexagons =
        hexgrid::generate(req.center_lon, req.center_lat, req.radius, settings.side_length);
    let generated = hexagons.len();
    // TODO: offer nearest-first truncation (sort by center distance) as an alternative policy.
    if let Some(n) = req.max_hexagons.filter(|n| *n > 0) {
        hexagons.truncate(n);
    }

    info!(
        target: "catchment",
        category = req.category.as_deref().unwrap_or("default"),
        radius = req.radius,
        side_length = settings.side_length,
        generated,
        enriching = hexagons.len(),
        "catchment run started"
    );

    let opts = settings.batch_options(None, req.return_responses);
    let results = enrich_all(enricher, &hexagons, &req.token, &opts).await;
    let pops: Vec<Option<f64>> = results.iter().map(|r| r.population).collect();
    let demand_scores = demand::score(&pops, req.radius, settings.base_max_per_km2);

    let missing = pops.iter().filter(|p| p.is_none()).count();
    counter!("catchment_runs_total").increment(1);
    histogram!("catchment_hexagons").record(hexagons.len() as f64);
    histogram!("catchment_run_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    info!(
        target: "catchment",
        hexagons = hexagons.len(),
        missing,
        elapsed_ms = t0.elapsed().as_millis() as u64,
        "catchment run finished"
    );

    Ok(CatchmentOutput {
        number_of_hexagons: hexagons.len(),
        hexagons,
        pops,
        demand_scores,
        raw_responses: req.return_responses.then_some(results),
        settings: settings.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_finite_inputs_are_rejected() {
        let base = CatchmentRequest {
            radius: 500.0,
            center_lon: 101.6869,
            center_lat: 3.139,
            ..Default::default()
        };
        assert!(validate(&base).is_ok());

        let bad_radius = CatchmentRequest {
            radius: f64::NAN,
            ..base.clone()
        };
        assert!(matches!(validate(&bad_radius), Err(CatchmentError::Validation(m)) if m.contains("radius")));

        let bad_lon = CatchmentRequest {
            center_lon: f64::INFINITY,
            ..base.clone()
        };
        assert!(matches!(validate(&bad_lon), Err(CatchmentError::Validation(m)) if m.contains("center_x")));

        let negative = CatchmentRequest {
            radius: -1.0,
            ..base
        };
        assert!(validate(&negative).is_err());
    }

    #[test]
    fn oversized_grid_is_rejected_before_generation() {
        assert!(check_grid_size(500.0, 100.0, 1000).is_ok());
        let err = check_grid_size(1e6, 50.0, 50_000).unwrap_err();
        assert!(matches!(err, CatchmentError::Validation(m) if m.contains("limit 50000")));
    }
}
