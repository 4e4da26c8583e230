//! Notification entity models and DTOs.

use geonotify_core::geo::GeoPoint;
use geonotify_core::notification::{NotificationStatus, NotificationType};
use geonotify_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// A row from the `notifications` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Notification {
    pub id: DbId,
    #[sqlx(try_from = "String")]
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Meters, within [100, 100000].
    pub radius: i32,
    pub location_name: Option<String>,
    pub target_criteria: serde_json::Value,
    pub data: serde_json::Value,
    pub is_active: bool,
    pub expires_at: Option<Timestamp>,
    /// `None` means dispatch on the next pass.
    pub scheduled_for: Option<Timestamp>,
    #[sqlx(try_from = "String")]
    pub status: NotificationStatus,
    pub status_changed_at: Timestamp,
    pub dispatch_attempts: i32,
    pub last_error: Option<String>,
    #[serde(skip)]
    pub claim_token: Option<Uuid>,
    #[serde(skip)]
    pub claim_expires_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Notification {
    pub fn origin(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }

    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn is_scheduled_after(&self, now: Timestamp) -> bool {
        self.scheduled_for.is_some_and(|at| at > now)
    }
}

/// DTO for creating a notification (producer boundary).
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateNotification {
    pub notification_type: NotificationType,
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    #[validate(length(min = 1))]
    pub message: String,
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,
    #[validate(range(min = 100, max = 100000))]
    pub radius: i32,
    pub location_name: Option<String>,
    #[serde(default)]
    pub target_criteria: serde_json::Value,
    #[serde(default)]
    pub data: serde_json::Value,
    pub is_active: Option<bool>,
    pub expires_at: Option<Timestamp>,
    pub scheduled_for: Option<Timestamp>,
}

/// Default page size for listing.
pub const DEFAULT_LIST_LIMIT: i64 = 50;

/// Maximum page size for listing.
pub const MAX_LIST_LIMIT: i64 = 100;

/// Query parameters for listing notifications.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationListQuery {
    pub status: Option<NotificationStatus>,
    pub notification_type: Option<NotificationType>,
    /// Case-insensitive substring over title, message and location name.
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl NotificationListQuery {
    /// Effective `(limit, offset)` after defaults and clamping.
    pub fn page(&self) -> (i64, i64) {
        (
            self.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT),
            self.offset.unwrap_or(0).max(0),
        )
    }

    /// Trimmed search text, if any.
    pub fn search_term(&self) -> Option<&str> {
        self.search.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_is_clamped() {
        assert_eq!(NotificationListQuery::default().page(), (50, 0));
        let q = NotificationListQuery {
            limit: Some(1000),
            offset: Some(-5),
            ..Default::default()
        };
        assert_eq!(q.page(), (100, 0));
    }

    #[test]
    fn blank_search_is_ignored() {
        let q = NotificationListQuery {
            search: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(q.search_term(), None);
    }
}
