//! Background passes and how they are run.
//!
//! - [`process`]: dispatch due notifications.
//! - [`cleanup`]: expire, purge and prune.
//! - [`retry`]: attempt budget and timeout per job invocation.
//! - [`queue`]: consume jobs enqueued by the operator CLI.
//! - [`scheduler`]: run a job on a fixed interval.
//!
//! Every long-running loop takes a [`CancellationToken`](tokio_util::sync::CancellationToken)
//! for graceful shutdown.

pub mod cleanup;
pub mod process;
pub mod queue;
pub mod retry;
pub mod scheduler;

use std::time::Duration;

use geonotify_core::jobs::JobKind;
use serde::Serialize;

pub use cleanup::{CleanupPass, CleanupReport, Retention};
pub use process::{PassError, ProcessPass, ProcessReport};
pub use queue::QueueConsumer;
pub use retry::{JobError, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum JobReport {
    Process(ProcessReport),
    Cleanup(CleanupReport),
}

impl JobReport {
    /// The pass stopped early on shutdown and did not cover its whole batch.
    pub fn interrupted(&self) -> bool {
        match self {
            JobReport::Process(report) => report.interrupted,
            JobReport::Cleanup(_) => false,
        }
    }
}

/// Runs either pass under its retry policy.
pub struct JobRunner {
    process: ProcessPass,
    cleanup: CleanupPass,
    process_policy: RetryPolicy,
    cleanup_policy: RetryPolicy,
}

impl JobRunner {
    pub fn new(process: ProcessPass, cleanup: CleanupPass) -> Self {
        Self {
            process,
            cleanup,
            process_policy: RetryPolicy::for_kind(JobKind::ProcessDueNotifications),
            cleanup_policy: RetryPolicy::for_kind(JobKind::CleanupNotifications),
        }
    }

    /// Replace the backoff schedule of both policies.
    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.process_policy = self.process_policy.with_backoff(backoff.clone());
        self.cleanup_policy = self.cleanup_policy.with_backoff(backoff);
        self
    }

    /// Run one invocation of `kind`. Returns the report and attempts used.
    pub async fn run(&self, kind: JobKind) -> Result<(JobReport, u32), JobError> {
        tracing::info!(job = %kind, "Job started");
        let result = match kind {
            JobKind::ProcessDueNotifications => self
                .process_policy
                .run(kind, |_| self.process.run())
                .await
                .map(|(report, attempts)| (JobReport::Process(report), attempts)),
            JobKind::CleanupNotifications => self
                .cleanup_policy
                .run(kind, |_| self.cleanup.run())
                .await
                .map(|(report, attempts)| (JobReport::Cleanup(report), attempts)),
        };
        if let Ok((_, attempts)) = &result {
            tracing::info!(job = %kind, attempts, "Job completed");
        }
        result
    }
}
