//! Read-only statistics rollups.

use std::collections::BTreeMap;

use geonotify_core::notification::{
    DeliveryChannel, DeliveryStatus, NotificationStatus, NotificationType,
};
use geonotify_core::types::Timestamp;
use serde::Serialize;
use sqlx::FromRow;

/// One `GROUP BY` bucket.
#[derive(Debug, Clone, FromRow)]
pub struct CountRow {
    pub key: String,
    pub count: i64,
}

/// One `GROUP BY channel, status` bucket.
#[derive(Debug, Clone, FromRow)]
pub struct PairCountRow {
    pub channel: String,
    pub status: String,
    pub count: i64,
}

/// Counts over notifications created in `[from, to)` and their deliveries.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NotificationStatistics {
    pub from: Option<Timestamp>,
    pub to: Option<Timestamp>,
    pub total: i64,
    pub by_status: BTreeMap<NotificationStatus, i64>,
    pub by_type: BTreeMap<NotificationType, i64>,
    pub deliveries: BTreeMap<DeliveryChannel, BTreeMap<DeliveryStatus, i64>>,
}

impl NotificationStatistics {
    pub fn status_count(&self, status: NotificationStatus) -> i64 {
        self.by_status.get(&status).copied().unwrap_or(0)
    }

    pub fn type_count(&self, notification_type: NotificationType) -> i64 {
        self.by_type.get(&notification_type).copied().unwrap_or(0)
    }

    pub fn delivery_count(&self, channel: DeliveryChannel, status: DeliveryStatus) -> i64 {
        self.deliveries
            .get(&channel)
            .and_then(|by_status| by_status.get(&status))
            .copied()
            .unwrap_or(0)
    }
}
