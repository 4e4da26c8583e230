//! Fixed-interval scheduling of a job.

use std::sync::Arc;
use std::time::Duration;

use geonotify_core::jobs::JobKind;
use tokio_util::sync::CancellationToken;

use super::JobRunner;

/// Run `kind` every `every` until `cancel` fires. The first run is immediate.
///
/// Failures are logged by the runner and never stop the loop; the next
/// tick tries again.
///
/// `cancel` should be the token the runner's passes were built with, so a
/// run in progress stops at the next notification or recipient.
pub async fn run_every(
    kind: JobKind,
    runner: Arc<JobRunner>,
    every: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(job = %kind, interval_secs = every.as_secs(), "Scheduled job started");

    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(job = %kind, "Scheduled job stopping");
                break;
            }
            _ = interval.tick() => {
                if let Err(e) = runner.run(kind).await {
                    tracing::error!(job = %kind, attempts = e.attempts(), error = %e, "Scheduled job failed");
                }
            }
        }
    }
}
