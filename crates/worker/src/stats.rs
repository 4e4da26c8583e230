//! Read-only rollups for dashboards.

use std::sync::Arc;

use geonotify_core::error::CoreError;
use geonotify_core::types::{DbId, Timestamp};
use geonotify_db::models::statistics::NotificationStatistics;

use crate::eligibility::{EligibilityMatcher, MatchError};
use crate::store::{NotificationStore, StoreError};

pub struct StatisticsAggregator {
    store: Arc<dyn NotificationStore>,
    matcher: EligibilityMatcher,
}

impl StatisticsAggregator {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self {
            matcher: EligibilityMatcher::new(Arc::clone(&store)),
            store,
        }
    }

    /// Counts by status, type, and delivery channel/status for notifications
    /// created in `[from, to)`. Either bound may be open.
    pub async fn snapshot(
        &self,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
    ) -> Result<NotificationStatistics, StoreError> {
        self.store.statistics(from, to).await
    }

    /// How many users the notification would reach right now, before
    /// preferences are applied.
    pub async fn eligible_recipient_count(&self, notification_id: DbId) -> Result<usize, MatchError> {
        let notification = self
            .store
            .find_notification(notification_id)
            .await?
            .ok_or(StoreError::Core(CoreError::NotFound {
                entity: "notification",
                id: notification_id,
            }))?;
        Ok(self.matcher.eligible_users(&notification).await?.len())
    }
}
