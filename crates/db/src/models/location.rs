//! User location profile model.

use geonotify_core::geo::GeoPoint;
use geonotify_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `user_location_profiles` table.
///
/// Written by the user's client whenever it reports a position; the engine
/// only reads it.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserLocationProfile {
    pub id: DbId,
    pub user_id: DbId,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub share_location: bool,
    pub updated_at: Timestamp,
}

impl UserLocationProfile {
    /// Last-known position, if the user has one and consents to sharing it.
    pub fn shared_point(&self) -> Option<GeoPoint> {
        if !self.share_location {
            return None;
        }
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
            _ => None,
        }
    }
}
