//! Attempt budget and overall timeout for one job invocation.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use geonotify_core::jobs::JobKind;

/// Delay before the 2nd, 3rd, ... attempt. The last entry repeats.
pub const DEFAULT_BACKOFF: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("{job} timed out after {budget:?} ({attempts} attempts started)")]
    Timeout {
        job: JobKind,
        budget: Duration,
        attempts: u32,
    },

    #[error("{job} failed after {attempts} attempts: {source}")]
    Failed {
        job: JobKind,
        attempts: u32,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl JobError {
    pub fn attempts(&self) -> u32 {
        match self {
            JobError::Timeout { attempts, .. } | JobError::Failed { attempts, .. } => *attempts,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Budget across all attempts and backoff sleeps.
    pub timeout: Duration,
    pub backoff: Vec<Duration>,
}

impl RetryPolicy {
    /// 3 attempts in 5 minutes for the process pass, 2 in 2 minutes for cleanup.
    pub fn for_kind(kind: JobKind) -> Self {
        Self {
            max_attempts: kind.max_attempts(),
            timeout: kind.timeout(),
            backoff: DEFAULT_BACKOFF.to_vec(),
        }
    }

    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sleep before attempt `next` (2-based).
    fn delay_before(&self, next: u32) -> Duration {
        let idx = next.saturating_sub(2) as usize;
        self.backoff
            .get(idx)
            .or(self.backoff.last())
            .copied()
            .unwrap_or_default()
    }

    /// Run `op` until it succeeds, the attempts run out, or the budget is
    /// spent. Returns the value and the number of attempts used.
    pub async fn run<T, E, F, Fut>(&self, job: JobKind, mut op: F) -> Result<(T, u32), JobError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let started = AtomicU32::new(0);
        let max_attempts = self.max_attempts.max(1);

        let attempts = async {
            let mut attempt = 1;
            loop {
                started.store(attempt, Ordering::Relaxed);
                match op(attempt).await {
                    Ok(value) => return Ok((value, attempt)),
                    Err(e) if attempt < max_attempts => {
                        let delay = self.delay_before(attempt + 1);
                        tracing::warn!(
                            %job,
                            attempt,
                            max_attempts,
                            retry_in_ms = delay.as_millis() as u64,
                            error = %e,
                            "Job attempt failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    Err(e) => {
                        tracing::error!(%job, attempt, max_attempts, error = %e, "Job failed");
                        return Err(JobError::Failed {
                            job,
                            attempts: attempt,
                            source: Box::new(e),
                        });
                    }
                }
            }
        };

        match tokio::time::timeout(self.timeout, attempts).await {
            Ok(result) => result,
            Err(_) => {
                let attempts = started.load(Ordering::Relaxed);
                tracing::error!(%job, attempts, budget_secs = self.timeout.as_secs(), "Job timed out");
                Err(JobError::Timeout {
                    job,
                    budget: self.timeout,
                    attempts,
                })
            }
        }
    }
}
