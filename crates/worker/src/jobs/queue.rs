//! Consumer for the persisted `background_jobs` queue.

use std::sync::Arc;
use std::time::Duration;

use geonotify_core::clock::Clock;
use tokio_util::sync::CancellationToken;

use super::JobRunner;
use crate::store::{NotificationStore, StoreError};

pub struct QueueConsumer {
    store: Arc<dyn NotificationStore>,
    runner: Arc<JobRunner>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    claim_timeout: chrono::Duration,
    cancel: CancellationToken,
}

impl QueueConsumer {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        runner: Arc<JobRunner>,
        clock: Arc<dyn Clock>,
        poll_interval: Duration,
        claim_timeout: chrono::Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            runner,
            clock,
            poll_interval,
            claim_timeout,
            cancel,
        }
    }

    /// Drain the queue: claim, run and settle jobs until none are queued or
    /// shutdown is signalled. Jobs left `running` past the claim timeout are
    /// claimed again. Returns the number of jobs settled.
    pub async fn run_pending_once(&self) -> Result<usize, StoreError> {
        let mut settled = 0;
        while !self.cancel.is_cancelled() {
            let now = self.clock.now();
            let Some(job) = self
                .store
                .claim_next_job(now, now - self.claim_timeout)
                .await?
            else {
                break;
            };
            tracing::info!(job_id = job.id, job = %job.job_type, "Claimed queued job");
            match self.runner.run(job.job_type).await {
                Ok((report, _)) if report.interrupted() => {
                    tracing::info!(job_id = job.id, "Job interrupted by shutdown, left for reclaim");
                    break;
                }
                Ok((_, attempts)) => {
                    self.store
                        .complete_job(job.id, attempts as i32, self.clock.now())
                        .await?;
                }
                Err(e) => {
                    self.store
                        .fail_job(job.id, e.attempts() as i32, &e.to_string(), self.clock.now())
                        .await?;
                }
            }
            settled += 1;
        }
        Ok(settled)
    }

    /// Poll the queue until shutdown is signalled.
    pub async fn run(self) {
        let cancel = self.cancel.clone();
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Job queue consumer started"
        );
        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Job queue consumer stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.run_pending_once().await {
                        Ok(0) => {}
                        Ok(settled) => tracing::debug!(settled, "Job queue drained"),
                        Err(e) => tracing::error!(error = %e, "Job queue poll failed"),
                    }
                }
            }
        }
    }
}
