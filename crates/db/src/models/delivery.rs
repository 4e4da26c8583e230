//! Delivery record model.

use geonotify_core::notification::{DeliveryChannel, DeliveryStatus};
use geonotify_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `delivery_records` table.
///
/// At most one row exists per `(notification_id, user_id, channel)`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DeliveryRecord {
    pub id: DbId,
    pub notification_id: DbId,
    pub user_id: DbId,
    #[sqlx(try_from = "String")]
    pub channel: DeliveryChannel,
    #[sqlx(try_from = "String")]
    pub status: DeliveryStatus,
    pub failure_reason: Option<String>,
    pub created_at: Timestamp,
    pub delivered_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

/// Per-notification delivery tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromRow, Serialize)]
pub struct DeliverySummary {
    pub total: i64,
    pub delivered: i64,
    pub failed: i64,
    /// Reserved but never settled, by a pass still running or one that died.
    pub queued: i64,
}

impl DeliverySummary {
    /// Every recorded attempt failed.
    pub fn all_failed(&self) -> bool {
        self.total > 0 && self.failed == self.total
    }
}
