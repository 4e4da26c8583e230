//! The cleanup pass: expire, purge, prune.

use std::sync::Arc;

use geonotify_core::clock::Clock;
use serde::Serialize;

use crate::config::WorkerConfig;
use crate::store::{NotificationStore, StoreError};

#[derive(Debug, Clone, Copy)]
pub struct Retention {
    pub notifications: chrono::Duration,
    pub deliveries: Option<chrono::Duration>,
    pub locations: Option<chrono::Duration>,
}

impl Retention {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            notifications: config.notification_retention,
            deliveries: config.delivery_retention,
            locations: config.location_retention,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub expired: u64,
    pub purged: u64,
    pub deliveries_pruned: u64,
    pub locations_pruned: u64,
}

pub struct CleanupPass {
    store: Arc<dyn NotificationStore>,
    clock: Arc<dyn Clock>,
    retention: Retention,
}

impl CleanupPass {
    pub fn new(store: Arc<dyn NotificationStore>, clock: Arc<dyn Clock>, retention: Retention) -> Self {
        Self {
            store,
            clock,
            retention,
        }
    }

    /// Expiry runs first so freshly expired rows start their retention clock.
    pub async fn run(&self) -> Result<CleanupReport, StoreError> {
        let now = self.clock.now();
        let mut report = CleanupReport {
            expired: self.store.expire_due(now).await?,
            purged: self
                .store
                .purge_terminal(now - self.retention.notifications)
                .await?,
            ..Default::default()
        };

        if let Some(keep) = self.retention.deliveries {
            report.deliveries_pruned = self.store.prune_deliveries(now - keep).await?;
        }
        if let Some(keep) = self.retention.locations {
            report.locations_pruned = self.store.prune_locations(now - keep).await?;
        }

        if report == CleanupReport::default() {
            tracing::debug!("Cleanup pass: nothing to do");
        } else {
            tracing::info!(
                expired = report.expired,
                purged = report.purged,
                deliveries_pruned = report.deliveries_pruned,
                locations_pruned = report.locations_pruned,
                "Cleanup pass finished"
            );
        }
        Ok(report)
    }
}
