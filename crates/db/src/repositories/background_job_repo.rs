//! Repository for the `background_jobs` queue.

use geonotify_core::jobs::{JobKind, JobStatus};
use geonotify_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::background_job::BackgroundJob;

/// Column list for `background_jobs` queries.
const COLUMNS: &str =
    "id, job_type, status, attempts, last_error, enqueued_at, claimed_at, completed_at";

pub struct BackgroundJobRepo;

impl BackgroundJobRepo {
    /// Queue a job for the worker daemon.
    pub async fn enqueue(
        pool: &PgPool,
        kind: JobKind,
        now: Timestamp,
    ) -> Result<BackgroundJob, sqlx::Error> {
        let query = format!(
            "INSERT INTO background_jobs (job_type, status, enqueued_at) \
             VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, BackgroundJob>(&query)
            .bind(kind.as_str())
            .bind(JobStatus::Queued.as_str())
            .bind(now)
            .fetch_one(pool)
            .await
    }

    /// Atomically claim the oldest queued job. A `running` job claimed
    /// before `stale_before` belongs to a consumer that died and is claimed
    /// again.
    ///
    /// Uses `SELECT FOR UPDATE SKIP LOCKED` so concurrent consumers never
    /// receive the same job.
    pub async fn claim_next(
        pool: &PgPool,
        now: Timestamp,
        stale_before: Timestamp,
    ) -> Result<Option<BackgroundJob>, sqlx::Error> {
        let query = format!(
            "UPDATE background_jobs \
             SET status = $1, claimed_at = $2 \
             WHERE id = ( \
                 SELECT id FROM background_jobs \
                 WHERE status = $3 OR (status = $1 AND claimed_at < $4) \
                 ORDER BY enqueued_at ASC, id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, BackgroundJob>(&query)
            .bind(JobStatus::Running.as_str())
            .bind(now)
            .bind(JobStatus::Queued.as_str())
            .bind(stale_before)
            .fetch_optional(pool)
            .await
    }

    pub async fn complete(
        pool: &PgPool,
        id: DbId,
        attempts: i32,
        now: Timestamp,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE background_jobs \
             SET status = $2, attempts = $3, completed_at = $4, last_error = NULL \
             WHERE id = $1",
        )
        .bind(id)
        .bind(JobStatus::Completed.as_str())
        .bind(attempts)
        .bind(now)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn fail(
        pool: &PgPool,
        id: DbId,
        attempts: i32,
        error: &str,
        now: Timestamp,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE background_jobs \
             SET status = $2, attempts = $3, last_error = $4, completed_at = $5 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(JobStatus::Failed.as_str())
        .bind(attempts)
        .bind(error)
        .bind(now)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<BackgroundJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM background_jobs WHERE id = $1");
        sqlx::query_as::<_, BackgroundJob>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }
}
