// src/geo/mod.rs
//! Geographic primitives: WGS84 points, closed polygon rings, and the local
//! equirectangular projection used to place hexagon vertices around a center.

pub mod hexgrid;

use serde::{Deserialize, Serialize};

/// Meters per degree of latitude (and of longitude at the equator).
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Substituted for `cos(lat)` when it underflows to zero near the poles.
const MIN_LON_SCALE: f64 = 1e-9;

/// A `(longitude, latitude)` pair in degrees. Serialized as `[lon, lat]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint(pub f64, pub f64);

impl GeoPoint {
    pub fn lon(&self) -> f64 {
        self.0
    }

    pub fn lat(&self) -> f64 {
        self.1
    }
}

/// Closed polygon ring: first and last points are coordinate-equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ring(Vec<GeoPoint>);

impl Ring {
    /// Builds a ring from raw points, appending the first point when the input
    /// is not already closed.
    pub fn closed(mut points: Vec<GeoPoint>) -> Self {
        if let (Some(first), Some(last)) = (points.first().copied(), points.last()) {
            if first != *last {
                points.push(first);
            }
        }
        Self(points)
    }

    pub fn points(&self) -> &[GeoPoint] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        match (self.0.first(), self.0.last()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

/// Convert a planar offset in meters (`dx` east, `dy` north) around a reference
/// latitude into `(d_lon, d_lat)` degrees.
pub fn meters_to_degrees(dx: f64, dy: f64, ref_lat_deg: f64) -> (f64, f64) {
    let meters_per_deg_lon = nonzero_lon_scale(METERS_PER_DEGREE * ref_lat_deg.to_radians().cos());
    (dx / meters_per_deg_lon, dy / METERS_PER_DEGREE)
}

fn nonzero_lon_scale(scale: f64) -> f64 {
    if scale == 0.0 {
        MIN_LON_SCALE
    } else {
        scale
    }
}

/// Round to 6 decimal digits (~0.1 m), the precision sent to the enrichment API.
pub fn round6(v: f64) -> f64 {
    (v * 1e6).round() / 1e6
}
