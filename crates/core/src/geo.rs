//! Geospatial distance math.
//!
//! Distances use the haversine formula on a spherical Earth with the mean
//! radius below. Accuracy is within ~0.5% of the ellipsoidal distance,
//! which is plenty for radius matching at 100 m granularity.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Smallest radius a notification may target.
pub const MIN_RADIUS_M: i32 = 100;

/// Largest radius a notification may target.
pub const MAX_RADIUS_M: i32 = 100_000;

/// A WGS84 latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance to `other` in meters.
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        haversine_distance(self, other)
    }

    /// Whether `other` lies within `radius_m` meters (inclusive).
    pub fn is_within(&self, other: &GeoPoint, radius_m: f64) -> bool {
        self.distance_to(other) <= radius_m
    }
}

/// Haversine distance between two points in meters.
pub fn haversine_distance(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Latitude span in degrees covered by `radius_m` meters.
///
/// Used as a cheap SQL prefilter before the exact haversine check.
pub fn latitude_delta_degrees(radius_m: f64) -> f64 {
    (radius_m / EARTH_RADIUS_M).to_degrees()
}

/// Reject coordinates outside [-90, 90] x [-180, 180] (or non-finite).
pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), CoreError> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(CoreError::Validation(format!(
            "latitude {latitude} is outside [-90, 90]"
        )));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(CoreError::Validation(format!(
            "longitude {longitude} is outside [-180, 180]"
        )));
    }
    Ok(())
}

/// Reject notification radii outside [`MIN_RADIUS_M`, `MAX_RADIUS_M`].
pub fn validate_radius(radius_m: i32) -> Result<(), CoreError> {
    if !(MIN_RADIUS_M..=MAX_RADIUS_M).contains(&radius_m) {
        return Err(CoreError::Validation(format!(
            "radius {radius_m} m is outside [{MIN_RADIUS_M}, {MAX_RADIUS_M}]"
        )));
    }
    Ok(())
}
