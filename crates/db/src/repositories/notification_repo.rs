//! Repository for the `notifications` table.

use chrono::Duration;
use geonotify_core::notification::NotificationStatus;
use geonotify_core::state_machine::expirable_statuses;
use geonotify_core::types::{DbId, Timestamp};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::notification::{CreateNotification, Notification, NotificationListQuery};

/// Column list for `notifications` queries.
const COLUMNS: &str = "\
    id, notification_type, title, message, latitude, longitude, radius, \
    location_name, target_criteria, data, is_active, expires_at, scheduled_for, \
    status, status_changed_at, dispatch_attempts, last_error, \
    claim_token, claim_expires_at, created_at, updated_at";

/// Statuses the cleanup purge may delete.
const TERMINAL_STATUSES: [&str; 3] = ["clicked", "failed", "expired"];

/// Provides persistence for notification campaigns.
pub struct NotificationRepo;

impl NotificationRepo {
    /// Insert a new notification in `pending`.
    pub async fn create(
        pool: &PgPool,
        input: &CreateNotification,
        now: Timestamp,
    ) -> Result<Notification, sqlx::Error> {
        let criteria = non_null_object(&input.target_criteria);
        let data = non_null_object(&input.data);
        let query = format!(
            "INSERT INTO notifications \
                (notification_type, title, message, latitude, longitude, radius, \
                 location_name, target_criteria, data, is_active, expires_at, scheduled_for, \
                 status, status_changed_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, COALESCE($10, true), $11, $12, \
                     $13, $14, $14, $14) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Notification>(&query)
            .bind(input.notification_type.as_str())
            .bind(&input.title)
            .bind(&input.message)
            .bind(input.latitude)
            .bind(input.longitude)
            .bind(input.radius)
            .bind(&input.location_name)
            .bind(criteria)
            .bind(data)
            .bind(input.is_active)
            .bind(input.expires_at)
            .bind(input.scheduled_for)
            .bind(NotificationStatus::Pending.as_str())
            .bind(now)
            .fetch_one(pool)
            .await
    }

    /// Find a notification by its internal ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Notification>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM notifications WHERE id = $1");
        sqlx::query_as::<_, Notification>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List notifications with optional filters, newest first.
    ///
    /// `search` matches title, message and location name case-insensitively.
    pub async fn list(
        pool: &PgPool,
        params: &NotificationListQuery,
    ) -> Result<Vec<Notification>, sqlx::Error> {
        let (limit, offset) = params.page();

        let mut conditions: Vec<String> = Vec::new();
        let mut bind_idx: u32 = 1;

        if params.status.is_some() {
            conditions.push(format!("status = ${bind_idx}"));
            bind_idx += 1;
        }
        if params.notification_type.is_some() {
            conditions.push(format!("notification_type = ${bind_idx}"));
            bind_idx += 1;
        }
        let pattern = params
            .search_term()
            .map(|s| format!("%{}%", escape_like(s)));
        if pattern.is_some() {
            conditions.push(format!(
                "(title ILIKE ${bind_idx} OR message ILIKE ${bind_idx} \
                 OR COALESCE(location_name, '') ILIKE ${bind_idx})"
            ));
            bind_idx += 1;
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let query = format!(
            "SELECT {COLUMNS} FROM notifications {where_clause} \
             ORDER BY created_at DESC, id DESC \
             LIMIT ${bind_idx} OFFSET ${}",
            bind_idx + 1
        );

        let mut q = sqlx::query_as::<_, Notification>(&query);
        if let Some(status) = params.status {
            q = q.bind(status.as_str());
        }
        if let Some(notification_type) = params.notification_type {
            q = q.bind(notification_type.as_str());
        }
        if let Some(ref pattern) = pattern {
            q = q.bind(pattern);
        }
        q.bind(limit).bind(offset).fetch_all(pool).await
    }

    /// Notifications due for a process pass at `now`.
    ///
    /// Rows whose processing lease is still live are skipped.
    pub async fn list_due(
        pool: &PgPool,
        now: Timestamp,
        limit: i64,
    ) -> Result<Vec<Notification>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM notifications \
             WHERE is_active AND status = $1 \
               AND (scheduled_for IS NULL OR scheduled_for <= $2) \
               AND (expires_at IS NULL OR expires_at > $2) \
               AND (claim_expires_at IS NULL OR claim_expires_at <= $2) \
             ORDER BY scheduled_for NULLS FIRST, id \
             LIMIT $3"
        );
        sqlx::query_as::<_, Notification>(&query)
            .bind(NotificationStatus::Pending.as_str())
            .bind(now)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Atomically take the processing lease on a pending notification.
    ///
    /// Succeeds only when no other lease is live; returns the claimed row.
    pub async fn try_claim(
        pool: &PgPool,
        id: DbId,
        token: Uuid,
        now: Timestamp,
        lease: Duration,
    ) -> Result<Option<Notification>, sqlx::Error> {
        let query = format!(
            "UPDATE notifications \
             SET claim_token = $2, claim_expires_at = $3 \
             WHERE id = $1 AND status = $4 \
               AND (claim_expires_at IS NULL OR claim_expires_at <= $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Notification>(&query)
            .bind(id)
            .bind(token)
            .bind(now + lease)
            .bind(NotificationStatus::Pending.as_str())
            .bind(now)
            .fetch_optional(pool)
            .await
    }

    /// Release a lease held under `token`. A stale token is a no-op.
    pub async fn release_claim(pool: &PgPool, id: DbId, token: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE notifications \
             SET claim_token = NULL, claim_expires_at = NULL \
             WHERE id = $1 AND claim_token = $2",
        )
        .bind(id)
        .bind(token)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Current `is_active` flag; a missing row reads as inactive.
    pub async fn is_active(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let active: Option<bool> =
            sqlx::query_scalar("SELECT is_active FROM notifications WHERE id = $1")
                .bind(id)
                .fetch_optional(pool)
                .await?;
        Ok(active.unwrap_or(false))
    }

    /// Compare-and-set the aggregate status.
    ///
    /// Returns `false` when the row is no longer in `from`. Legality of the
    /// transition is checked by the caller.
    pub async fn transition_status(
        pool: &PgPool,
        id: DbId,
        from: NotificationStatus,
        to: NotificationStatus,
        now: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE notifications \
             SET status = $3, status_changed_at = $4, updated_at = $4 \
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

    /// Count a finished dispatch pass, returning the new attempt total.
    pub async fn record_dispatch_attempt(
        pool: &PgPool,
        id: DbId,
        error: Option<&str>,
        now: Timestamp,
    ) -> Result<i32, sqlx::Error> {
        let attempts: Option<i32> = sqlx::query_scalar(
            "UPDATE notifications \
             SET dispatch_attempts = dispatch_attempts + 1, \
                 last_error = COALESCE($2, last_error), updated_at = $3 \
             WHERE id = $1 \
             RETURNING dispatch_attempts",
        )
        .bind(id)
        .bind(error)
        .bind(now)
        .fetch_optional(pool)
        .await?;
        Ok(attempts.unwrap_or(0))
    }

    /// Move `pending`/`sent` notifications past their expiry to `expired`.
    pub async fn expire_due(pool: &PgPool, now: Timestamp) -> Result<u64, sqlx::Error> {
        let expirable: Vec<&str> = expirable_statuses().map(NotificationStatus::as_str).collect();
        let result = sqlx::query(
            "UPDATE notifications \
             SET status = $1, status_changed_at = $2, updated_at = $2 \
             WHERE status = ANY($3) AND expires_at IS NOT NULL AND expires_at <= $2",
        )
        .bind(NotificationStatus::Expired.as_str())
        .bind(now)
        .bind(&expirable[..])
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete terminal notifications whose status changed strictly before `cutoff`.
    pub async fn purge_terminal(pool: &PgPool, cutoff: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM notifications \
             WHERE status = ANY($1) AND status_changed_at < $2",
        )
        .bind(&TERMINAL_STATUSES[..])
        .bind(cutoff)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Clear `is_active`. In-flight dispatches observe it between sends.
    pub async fn deactivate(pool: &PgPool, id: DbId, now: Timestamp) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE notifications SET is_active = false, updated_at = $2 \
             WHERE id = $1 AND is_active",
        )
        .bind(id)
        .bind(now)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn non_null_object(value: &serde_json::Value) -> serde_json::Value {
    if value.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        value.clone()
    }
}

/// Escape `%`, `_` and `\` for use inside an `ILIKE` pattern.
fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
