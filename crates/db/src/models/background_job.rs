//! Persisted job queue model.

use geonotify_core::jobs::{JobKind, JobStatus};
use geonotify_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `background_jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BackgroundJob {
    pub id: DbId,
    #[sqlx(try_from = "String")]
    pub job_type: JobKind,
    #[sqlx(try_from = "String")]
    pub status: JobStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub enqueued_at: Timestamp,
    pub claimed_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}
