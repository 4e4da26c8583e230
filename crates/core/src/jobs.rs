//! Background job vocabulary shared by the queue table and the worker.

use std::time::Duration;

define_text_enum! {
    /// The two recurring engine passes.
    JobKind {
        ProcessDueNotifications => "process_due_notifications",
        CleanupNotifications => "cleanup_notifications",
    }
}

define_text_enum! {
    /// Lifecycle of a queued job row.
    JobStatus {
        Queued => "queued",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
    }
}

impl JobKind {
    /// Attempts allowed per job invocation.
    pub fn max_attempts(self) -> u32 {
        match self {
            JobKind::ProcessDueNotifications => 3,
            JobKind::CleanupNotifications => 2,
        }
    }

    /// Overall wall-clock budget across all attempts.
    pub fn timeout(self) -> Duration {
        match self {
            JobKind::ProcessDueNotifications => Duration::from_secs(5 * 60),
            JobKind::CleanupNotifications => Duration::from_secs(2 * 60),
        }
    }
}
