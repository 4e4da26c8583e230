//! Recipient read model (from the account service's `users` table).

use geonotify_core::types::DbId;
use serde::Serialize;
use sqlx::FromRow;

/// Contact details and targeting attributes for one user.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Recipient {
    pub id: DbId,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub push_token: Option<String>,
    /// Flat JSON object of attributes matched by target criteria.
    pub attributes: serde_json::Value,
    pub is_active: bool,
}

impl Recipient {
    pub fn attribute_map(&self) -> serde_json::Map<String, serde_json::Value> {
        self.attributes.as_object().cloned().unwrap_or_default()
    }
}
