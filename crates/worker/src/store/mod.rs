//! The engine's persistence seam.
//!
//! [`NotificationStore`] is everything the engine reads or writes. The
//! production implementation is [`PgStore`]; [`MemoryStore`] backs tests and
//! local tooling. All coordination between workers goes through the store:
//! leases on notification rows, compare-and-set on status columns, and the
//! unique `(notification, user, channel)` delivery key.

use async_trait::async_trait;
use chrono::Duration;
use geonotify_core::error::CoreError;
use geonotify_core::geo::GeoPoint;
use geonotify_core::jobs::JobKind;
use geonotify_core::notification::{DeliveryChannel, DeliveryStatus, NotificationStatus};
use geonotify_core::types::{DbId, Timestamp};
use geonotify_db::models::background_job::BackgroundJob;
use geonotify_db::models::delivery::{DeliveryRecord, DeliverySummary};
use geonotify_db::models::location::UserLocationProfile;
use geonotify_db::models::notification::{CreateNotification, Notification, NotificationListQuery};
use geonotify_db::models::preference::{NotificationPreferences, UpdateNotificationPreferences};
use geonotify_db::models::recipient::Recipient;
use geonotify_db::models::statistics::NotificationStatistics;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// The backend could not be reached (connection refused, pool closed).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Connectivity and timeout failures are worth retrying; constraint
    /// violations, decode errors and domain errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            StoreError::Unavailable(_) => true,
            StoreError::Core(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Candidate
// ---------------------------------------------------------------------------

/// A user who may match a notification, with everything the matcher and
/// the preference gate need to decide.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub recipient: Recipient,
    pub location: Option<UserLocationProfile>,
    /// Stored preferences, or the defaults if the user has none yet.
    pub preferences: NotificationPreferences,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait NotificationStore: Send + Sync {
    // --- notifications ---

    async fn create_notification(
        &self,
        input: &CreateNotification,
        now: Timestamp,
    ) -> Result<Notification, StoreError>;

    async fn find_notification(&self, id: DbId) -> Result<Option<Notification>, StoreError>;

    async fn list_notifications(
        &self,
        params: &NotificationListQuery,
    ) -> Result<Vec<Notification>, StoreError>;

    /// Active, pending, due and unexpired notifications with no live lease.
    async fn list_due(&self, now: Timestamp, limit: i64) -> Result<Vec<Notification>, StoreError>;

    /// Take the processing lease. `None` means another worker holds it.
    async fn try_claim(
        &self,
        id: DbId,
        token: Uuid,
        now: Timestamp,
        lease: Duration,
    ) -> Result<Option<Notification>, StoreError>;

    async fn release_claim(&self, id: DbId, token: Uuid) -> Result<(), StoreError>;

    async fn is_active(&self, id: DbId) -> Result<bool, StoreError>;

    /// Apply a legal status transition as a compare-and-set on `from`.
    ///
    /// Illegal transitions are rejected with [`CoreError::InvalidTransition`];
    /// `Ok(false)` means the row was no longer in `from`.
    async fn transition_status(
        &self,
        id: DbId,
        from: NotificationStatus,
        to: NotificationStatus,
        now: Timestamp,
    ) -> Result<bool, StoreError>;

    /// Count a dispatch pass that delivered nothing; returns the new total.
    async fn record_dispatch_attempt(
        &self,
        id: DbId,
        error: Option<&str>,
        now: Timestamp,
    ) -> Result<i32, StoreError>;

    async fn deactivate(&self, id: DbId, now: Timestamp) -> Result<bool, StoreError>;

    async fn expire_due(&self, now: Timestamp) -> Result<u64, StoreError>;

    /// Delete terminal notifications whose status changed strictly before `cutoff`.
    async fn purge_terminal(&self, cutoff: Timestamp) -> Result<u64, StoreError>;

    // --- recipients and preferences ---

    /// Users that could be within `radius_m` of `origin` by live location,
    /// plus every user with favorites. A superset; the matcher filters.
    async fn candidates(&self, origin: GeoPoint, radius_m: f64) -> Result<Vec<Candidate>, StoreError>;

    /// A user's preferences, created with defaults on first access.
    async fn preferences(
        &self,
        user_id: DbId,
        now: Timestamp,
    ) -> Result<NotificationPreferences, StoreError>;

    /// Apply a partial update. Invalid input is rejected with
    /// [`CoreError::Validation`] before anything is written.
    async fn update_preferences(
        &self,
        user_id: DbId,
        input: &UpdateNotificationPreferences,
        now: Timestamp,
    ) -> Result<NotificationPreferences, StoreError>;

    async fn prune_locations(&self, cutoff: Timestamp) -> Result<u64, StoreError>;

    // --- delivery records ---

    /// Reserve the `(notification, user, channel)` slot. `None` means it is
    /// taken and nothing must be sent.
    ///
    /// A `queued` record not touched since `stale_before` belongs to a pass
    /// that died between reserving and settling it; it is handed over.
    async fn try_reserve_delivery(
        &self,
        notification_id: DbId,
        user_id: DbId,
        channel: DeliveryChannel,
        now: Timestamp,
        stale_before: Timestamp,
    ) -> Result<Option<DbId>, StoreError>;

    /// Settle a queued record as `sent` or `failed`.
    async fn complete_delivery(
        &self,
        id: DbId,
        outcome: DeliveryStatus,
        failure_reason: Option<&str>,
        now: Timestamp,
    ) -> Result<bool, StoreError>;

    async fn delivered_notifications_since(
        &self,
        user_id: DbId,
        since: Timestamp,
    ) -> Result<i64, StoreError>;

    async fn last_delivered_at(&self, user_id: DbId) -> Result<Option<Timestamp>, StoreError>;

    async fn delivery_summary(&self, notification_id: DbId) -> Result<DeliverySummary, StoreError>;

    async fn find_delivery(
        &self,
        notification_id: DbId,
        user_id: DbId,
        channel: DeliveryChannel,
    ) -> Result<Option<DeliveryRecord>, StoreError>;

    async fn list_deliveries(&self, notification_id: DbId) -> Result<Vec<DeliveryRecord>, StoreError>;

    async fn apply_delivery_interaction(
        &self,
        id: DbId,
        from: DeliveryStatus,
        to: DeliveryStatus,
        now: Timestamp,
    ) -> Result<bool, StoreError>;

    async fn prune_deliveries(&self, cutoff: Timestamp) -> Result<u64, StoreError>;

    // --- job queue ---

    async fn enqueue_job(&self, kind: JobKind, now: Timestamp) -> Result<BackgroundJob, StoreError>;

    /// Claim the oldest queued job, or a `running` one claimed before
    /// `stale_before` whose consumer never settled it.
    async fn claim_next_job(
        &self,
        now: Timestamp,
        stale_before: Timestamp,
    ) -> Result<Option<BackgroundJob>, StoreError>;

    async fn complete_job(&self, id: DbId, attempts: i32, now: Timestamp) -> Result<(), StoreError>;

    async fn fail_job(
        &self,
        id: DbId,
        attempts: i32,
        error: &str,
        now: Timestamp,
    ) -> Result<(), StoreError>;

    // --- statistics ---

    /// Counts over notifications created in `[from, to)`, read from one
    /// consistent snapshot.
    async fn statistics(
        &self,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
    ) -> Result<NotificationStatistics, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(StoreError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(StoreError::Unavailable("connection refused".into()).is_transient());
        assert!(!StoreError::Database(sqlx::Error::RowNotFound).is_transient());
        assert!(!StoreError::Core(CoreError::Validation("bad".into())).is_transient());
    }
}
