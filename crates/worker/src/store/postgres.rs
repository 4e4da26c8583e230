//! [`NotificationStore`] over Postgres, delegating to the `geonotify-db`
//! repositories.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Duration;
use geonotify_core::geo::{latitude_delta_degrees, GeoPoint};
use geonotify_core::jobs::JobKind;
use geonotify_core::notification::{DeliveryChannel, DeliveryStatus, NotificationStatus};
use geonotify_core::state_machine::{validate_delivery_transition, validate_transition};
use geonotify_core::types::{DbId, Timestamp};
use geonotify_db::models::background_job::BackgroundJob;
use geonotify_db::models::delivery::{DeliveryRecord, DeliverySummary};
use geonotify_db::models::notification::{CreateNotification, Notification, NotificationListQuery};
use geonotify_db::models::preference::{NotificationPreferences, UpdateNotificationPreferences};
use geonotify_db::models::statistics::NotificationStatistics;
use geonotify_db::repositories::{
    BackgroundJobRepo, DeliveryRecordRepo, LocationProfileRepo, NotificationPreferenceRepo,
    NotificationRepo, RecipientRepo, StatisticsRepo,
};
use geonotify_db::DbPool;
use uuid::Uuid;

use super::{Candidate, NotificationStore, StoreError};

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn create_notification(
        &self,
        input: &CreateNotification,
        now: Timestamp,
    ) -> Result<Notification, StoreError> {
        Ok(NotificationRepo::create(&self.pool, input, now).await?)
    }

    async fn find_notification(&self, id: DbId) -> Result<Option<Notification>, StoreError> {
        Ok(NotificationRepo::find_by_id(&self.pool, id).await?)
    }

    async fn list_notifications(
        &self,
        params: &NotificationListQuery,
    ) -> Result<Vec<Notification>, StoreError> {
        Ok(NotificationRepo::list(&self.pool, params).await?)
    }

    async fn list_due(&self, now: Timestamp, limit: i64) -> Result<Vec<Notification>, StoreError> {
        Ok(NotificationRepo::list_due(&self.pool, now, limit).await?)
    }

    async fn try_claim(
        &self,
        id: DbId,
        token: Uuid,
        now: Timestamp,
        lease: Duration,
    ) -> Result<Option<Notification>, StoreError> {
        Ok(NotificationRepo::try_claim(&self.pool, id, token, now, lease).await?)
    }

    async fn release_claim(&self, id: DbId, token: Uuid) -> Result<(), StoreError> {
        if !NotificationRepo::release_claim(&self.pool, id, token).await? {
            tracing::debug!(notification_id = id, "Lease already released or taken over");
        }
        Ok(())
    }

    async fn is_active(&self, id: DbId) -> Result<bool, StoreError> {
        Ok(NotificationRepo::is_active(&self.pool, id).await?)
    }

    async fn transition_status(
        &self,
        id: DbId,
        from: NotificationStatus,
        to: NotificationStatus,
        now: Timestamp,
    ) -> Result<bool, StoreError> {
        validate_transition(from, to)?;
        Ok(NotificationRepo::transition_status(&self.pool, id, from, to, now).await?)
    }

    async fn record_dispatch_attempt(
        &self,
        id: DbId,
        error: Option<&str>,
        now: Timestamp,
    ) -> Result<i32, StoreError> {
        Ok(NotificationRepo::record_dispatch_attempt(&self.pool, id, error, now).await?)
    }

    async fn deactivate(&self, id: DbId, now: Timestamp) -> Result<bool, StoreError> {
        Ok(NotificationRepo::deactivate(&self.pool, id, now).await?)
    }

    async fn expire_due(&self, now: Timestamp) -> Result<u64, StoreError> {
        Ok(NotificationRepo::expire_due(&self.pool, now).await?)
    }

    async fn purge_terminal(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        Ok(NotificationRepo::purge_terminal(&self.pool, cutoff).await?)
    }

    async fn candidates(&self, origin: GeoPoint, radius_m: f64) -> Result<Vec<Candidate>, StoreError> {
        let delta = latitude_delta_degrees(radius_m);
        let ids = RecipientRepo::candidate_ids(
            &self.pool,
            origin.latitude - delta,
            origin.latitude + delta,
        )
        .await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let recipients = RecipientRepo::find_by_ids(&self.pool, &ids).await?;
        let mut locations: HashMap<DbId, _> = LocationProfileRepo::find_by_user_ids(&self.pool, &ids)
            .await?
            .into_iter()
            .map(|p| (p.user_id, p))
            .collect();
        let mut preferences: HashMap<DbId, _> =
            NotificationPreferenceRepo::find_by_user_ids(&self.pool, &ids)
                .await?
                .into_iter()
                .map(|p| (p.user_id, p))
                .collect();

        // Users without a row yet are matched against in-memory defaults;
        // the row itself is created on first access through `preferences`.
        let epoch = Timestamp::default();
        Ok(recipients
            .into_iter()
            .map(|recipient| Candidate {
                location: locations.remove(&recipient.id),
                preferences: preferences
                    .remove(&recipient.id)
                    .unwrap_or_else(|| NotificationPreferences::defaults_for(recipient.id, epoch)),
                recipient,
            })
            .collect())
    }

    async fn preferences(
        &self,
        user_id: DbId,
        now: Timestamp,
    ) -> Result<NotificationPreferences, StoreError> {
        Ok(NotificationPreferenceRepo::get_or_create(&self.pool, user_id, now).await?)
    }

    async fn update_preferences(
        &self,
        user_id: DbId,
        input: &UpdateNotificationPreferences,
        now: Timestamp,
    ) -> Result<NotificationPreferences, StoreError> {
        input.check()?;
        Ok(NotificationPreferenceRepo::upsert(&self.pool, user_id, input, now).await?)
    }

    async fn prune_locations(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        Ok(LocationProfileRepo::prune_stale(&self.pool, cutoff).await?)
    }

    async fn try_reserve_delivery(
        &self,
        notification_id: DbId,
        user_id: DbId,
        channel: DeliveryChannel,
        now: Timestamp,
        stale_before: Timestamp,
    ) -> Result<Option<DbId>, StoreError> {
        Ok(DeliveryRecordRepo::try_insert(
            &self.pool,
            notification_id,
            user_id,
            channel,
            now,
            stale_before,
        )
        .await?)
    }

    async fn complete_delivery(
        &self,
        id: DbId,
        outcome: DeliveryStatus,
        failure_reason: Option<&str>,
        now: Timestamp,
    ) -> Result<bool, StoreError> {
        validate_delivery_transition(DeliveryStatus::Queued, outcome)?;
        Ok(DeliveryRecordRepo::complete(&self.pool, id, outcome, failure_reason, now).await?)
    }

    async fn delivered_notifications_since(
        &self,
        user_id: DbId,
        since: Timestamp,
    ) -> Result<i64, StoreError> {
        Ok(DeliveryRecordRepo::count_delivered_notifications_since(&self.pool, user_id, since).await?)
    }

    async fn last_delivered_at(&self, user_id: DbId) -> Result<Option<Timestamp>, StoreError> {
        Ok(DeliveryRecordRepo::last_delivered_at(&self.pool, user_id).await?)
    }

    async fn delivery_summary(&self, notification_id: DbId) -> Result<DeliverySummary, StoreError> {
        Ok(DeliveryRecordRepo::summary_for_notification(&self.pool, notification_id).await?)
    }

    async fn find_delivery(
        &self,
        notification_id: DbId,
        user_id: DbId,
        channel: DeliveryChannel,
    ) -> Result<Option<DeliveryRecord>, StoreError> {
        Ok(DeliveryRecordRepo::find(&self.pool, notification_id, user_id, channel).await?)
    }

    async fn list_deliveries(&self, notification_id: DbId) -> Result<Vec<DeliveryRecord>, StoreError> {
        Ok(DeliveryRecordRepo::list_for_notification(&self.pool, notification_id).await?)
    }

    async fn apply_delivery_interaction(
        &self,
        id: DbId,
        from: DeliveryStatus,
        to: DeliveryStatus,
        now: Timestamp,
    ) -> Result<bool, StoreError> {
        validate_delivery_transition(from, to)?;
        Ok(DeliveryRecordRepo::apply_interaction(&self.pool, id, from, to, now).await?)
    }

    async fn prune_deliveries(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        Ok(DeliveryRecordRepo::prune_older_than(&self.pool, cutoff).await?)
    }

    async fn enqueue_job(&self, kind: JobKind, now: Timestamp) -> Result<BackgroundJob, StoreError> {
        Ok(BackgroundJobRepo::enqueue(&self.pool, kind, now).await?)
    }

    async fn claim_next_job(
        &self,
        now: Timestamp,
        stale_before: Timestamp,
    ) -> Result<Option<BackgroundJob>, StoreError> {
        Ok(BackgroundJobRepo::claim_next(&self.pool, now, stale_before).await?)
    }

    async fn complete_job(&self, id: DbId, attempts: i32, now: Timestamp) -> Result<(), StoreError> {
        Ok(BackgroundJobRepo::complete(&self.pool, id, attempts, now).await?)
    }

    async fn fail_job(
        &self,
        id: DbId,
        attempts: i32,
        error: &str,
        now: Timestamp,
    ) -> Result<(), StoreError> {
        Ok(BackgroundJobRepo::fail(&self.pool, id, attempts, error, now).await?)
    }

    async fn statistics(
        &self,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
    ) -> Result<NotificationStatistics, StoreError> {
        Ok(StatisticsRepo::snapshot(&self.pool, from, to).await?)
    }
}
