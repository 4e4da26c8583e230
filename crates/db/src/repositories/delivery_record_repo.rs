//! Repository for the `delivery_records` table.
//!
//! The `(notification_id, user_id, channel)` unique constraint is the
//! fan-out de-duplication guard: [`DeliveryRecordRepo::try_insert`] is the
//! only way a record comes into existence or changes hands.

use geonotify_core::notification::{DeliveryChannel, DeliveryStatus};
use geonotify_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::delivery::{DeliveryRecord, DeliverySummary};

/// Column list for `delivery_records` queries.
const COLUMNS: &str = "\
    id, notification_id, user_id, channel, status, failure_reason, \
    created_at, delivered_at, updated_at";

/// Statuses that count as a successful delivery.
const DELIVERED_STATUSES: [&str; 3] = ["sent", "read", "clicked"];

pub struct DeliveryRecordRepo;

impl DeliveryRecordRepo {
    /// Reserve the `(notification, user, channel)` slot in `queued`.
    ///
    /// A `queued` record last touched before `stale_before` was left by a
    /// pass that never settled it and is taken over. Returns `None` when the
    /// slot is settled or held by a live pass; the caller must not send.
    pub async fn try_insert(
        pool: &PgPool,
        notification_id: DbId,
        user_id: DbId,
        channel: DeliveryChannel,
        now: Timestamp,
        stale_before: Timestamp,
    ) -> Result<Option<DbId>, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO delivery_records \
                (notification_id, user_id, channel, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $5) \
             ON CONFLICT (notification_id, user_id, channel) DO UPDATE \
                SET updated_at = EXCLUDED.updated_at \
                WHERE delivery_records.status = $4 AND delivery_records.updated_at < $6 \
             RETURNING id",
        )
        .bind(notification_id)
        .bind(user_id)
        .bind(channel.as_str())
        .bind(DeliveryStatus::Queued.as_str())
        .bind(now)
        .bind(stale_before)
        .fetch_optional(pool)
        .await
    }

    /// Settle a queued record as `sent` or `failed`.
    pub async fn complete(
        pool: &PgPool,
        id: DbId,
        outcome: DeliveryStatus,
        failure_reason: Option<&str>,
        now: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let delivered_at = outcome.is_delivered().then_some(now);
        let result = sqlx::query(
            "UPDATE delivery_records \
             SET status = $2, failure_reason = $3, delivered_at = $4, updated_at = $5 \
             WHERE id = $1 AND status = $6",
        )
        .bind(id)
        .bind(outcome.as_str())
        .bind(failure_reason)
        .bind(delivered_at)
        .bind(now)
        .bind(DeliveryStatus::Queued.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Distinct notifications successfully delivered to a user since `since`.
    pub async fn count_delivered_notifications_since(
        pool: &PgPool,
        user_id: DbId,
        since: Timestamp,
    ) -> Result<i64, sqlx::Error> {
        let count: Option<i64> = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT notification_id) FROM delivery_records \
             WHERE user_id = $1 AND status = ANY($2) AND delivered_at >= $3",
        )
        .bind(user_id)
        .bind(&DELIVERED_STATUSES[..])
        .bind(since)
        .fetch_one(pool)
        .await?;
        Ok(count.unwrap_or(0))
    }

    /// Most recent successful delivery to a user, across all notifications.
    pub async fn last_delivered_at(
        pool: &PgPool,
        user_id: DbId,
    ) -> Result<Option<Timestamp>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT MAX(delivered_at) FROM delivery_records \
             WHERE user_id = $1 AND status = ANY($2)",
        )
        .bind(user_id)
        .bind(&DELIVERED_STATUSES[..])
        .fetch_one(pool)
        .await
    }

    pub async fn summary_for_notification(
        pool: &PgPool,
        notification_id: DbId,
    ) -> Result<DeliverySummary, sqlx::Error> {
        sqlx::query_as::<_, DeliverySummary>(
            "SELECT COUNT(*) AS total, \
                    COUNT(*) FILTER (WHERE status = ANY($2)) AS delivered, \
                    COUNT(*) FILTER (WHERE status = $3) AS failed, \
                    COUNT(*) FILTER (WHERE status = $4) AS queued \
             FROM delivery_records WHERE notification_id = $1",
        )
        .bind(notification_id)
        .bind(&DELIVERED_STATUSES[..])
        .bind(DeliveryStatus::Failed.as_str())
        .bind(DeliveryStatus::Queued.as_str())
        .fetch_one(pool)
        .await
    }

    pub async fn find(
        pool: &PgPool,
        notification_id: DbId,
        user_id: DbId,
        channel: DeliveryChannel,
    ) -> Result<Option<DeliveryRecord>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM delivery_records \
             WHERE notification_id = $1 AND user_id = $2 AND channel = $3"
        );
        sqlx::query_as::<_, DeliveryRecord>(&query)
            .bind(notification_id)
            .bind(user_id)
            .bind(channel.as_str())
            .fetch_optional(pool)
            .await
    }

    pub async fn list_for_notification(
        pool: &PgPool,
        notification_id: DbId,
    ) -> Result<Vec<DeliveryRecord>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM delivery_records \
             WHERE notification_id = $1 ORDER BY user_id, channel"
        );
        sqlx::query_as::<_, DeliveryRecord>(&query)
            .bind(notification_id)
            .fetch_all(pool)
            .await
    }

    /// Compare-and-set a record's status for a recipient interaction.
    pub async fn apply_interaction(
        pool: &PgPool,
        id: DbId,
        from: DeliveryStatus,
        to: DeliveryStatus,
        now: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE delivery_records SET status = $3, updated_at = $4 \
             WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(now)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete records created before `cutoff`, except those of notifications
    /// still pending (they remain the de-duplication guard).
    pub async fn prune_older_than(pool: &PgPool, cutoff: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM delivery_records d \
             USING notifications n \
             WHERE n.id = d.notification_id AND n.status <> 'pending' \
               AND d.created_at < $1",
        )
        .bind(cutoff)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
