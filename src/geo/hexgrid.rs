// src/geo/hexgrid.rs
//! Pointy-top axial hexagon grid covering a circular catchment.
//!
//! Hex centers sit at `x = 1.5*s*q`, `y = s*sqrt(3)*(r + q/2)` meters from the
//! catchment center. A hex is kept when its center lies within
//! `radius + side_length` of the origin; boundary hexes may therefore extend
//! past the nominal radius.

use super::{meters_to_degrees, round6, GeoPoint, Ring};

/// Number of vertices per hexagon (the closed ring carries one more).
pub const HEX_VERTICES: usize = 6;

/// Planar hex center for axial coordinates `(q, r)` and side length `s`.
pub fn axial_center(q: i64, r: i64, s: f64) -> (f64, f64) {
    let qf = q as f64;
    let rf = r as f64;
    (s * 1.5 * qf, s * 3f64.sqrt() * (rf + qf / 2.0))
}

/// Approximate hex count for a catchment: disk of `radius + side` over the
/// area of one hex (`1.5 * sqrt(3) * s^2`). Cheap enough to check before generating.
pub fn estimated_cells(radius_m: f64, side_m: f64) -> f64 {
    let reach = radius_m + side_m;
    std::f64::consts::PI * reach * reach / (1.5 * 3f64.sqrt() * side_m * side_m)
}

/// Axial coordinates of every retained hex, in q-outer / r-inner order.
pub fn axial_cells(radius_m: f64, side_m: f64) -> Vec<(i64, i64)> {
    let max_dist = radius_m + side_m;
    if !(max_dist.is_finite() && side_m > 0.0) || max_dist < 0.0 {
        return Vec::new();
    }
    let max_q = (max_dist / (1.5 * side_m)).ceil() as i64;
    let max_r = (max_dist / (3f64.sqrt() * side_m)).ceil() as i64;

    let mut cells = Vec::new();
    for q in -max_q..=max_q {
        for r in -max_r..=max_r {
            let (x, y) = axial_center(q, r, side_m);
            if x.hypot(y) > max_dist {
                continue;
            }
            cells.push((q, r));
        }
    }
    cells
}

/// Generate the hexagon rings tiling the catchment around `(center_lon, center_lat)`.
///
/// Each ring has exactly 7 points (6 vertices + closing point), coordinates
/// rounded to 6 decimals. Output order follows [`axial_cells`].
pub fn generate(center_lon: f64, center_lat: f64, radius_m: f64, side_m: f64) -> Vec<Ring> {
    axial_cells(radius_m, side_m)
        .into_iter()
        .map(|(q, r)| {
            let (cx, cy) = axial_center(q, r, side_m);
            hexagon_ring(center_lon, center_lat, cx, cy, side_m)
        })
        .collect()
}

fn hexagon_ring(center_lon: f64, center_lat: f64, cx: f64, cy: f64, side_m: f64) -> Ring {
    let start = std::f64::consts::FRAC_PI_6;
    let step = std::f64::consts::FRAC_PI_3;
    let vertices = (0..HEX_VERTICES)
        .map(|k| {
            let angle = start + k as f64 * step;
            let vx = cx + side_m * angle.cos();
            let vy = cy + side_m * angle.sin();
            let (d_lon, d_lat) = meters_to_degrees(vx, vy, center_lat);
            GeoPoint(round6(center_lon + d_lon), round6(center_lat + d_lat))
        })
        .collect();
    Ring::closed(vertices)
}
