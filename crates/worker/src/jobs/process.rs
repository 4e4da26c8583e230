//! The process pass: dispatch every due notification.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use geonotify_core::clock::Clock;
use geonotify_core::types::DbId;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::{DeliveryDispatcher, DispatchError};
use crate::store::{NotificationStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum PassError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Some notifications hit transient errors; the pass is worth retrying.
    #[error("{count} notifications failed with transient errors")]
    Transient { count: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    pub selected: usize,
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub eligible: usize,
    pub delivered: usize,
    pub suppressed: usize,
    pub failed: usize,
    /// Shutdown stopped the pass early; unvisited notifications stay due.
    pub interrupted: bool,
}

pub struct ProcessPass {
    store: Arc<dyn NotificationStore>,
    dispatcher: Arc<DeliveryDispatcher>,
    clock: Arc<dyn Clock>,
    batch_size: i64,
    concurrency: usize,
    cancel: CancellationToken,
}

impl ProcessPass {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        dispatcher: Arc<DeliveryDispatcher>,
        clock: Arc<dyn Clock>,
        batch_size: i64,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            dispatcher,
            clock,
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Stop starting new notifications once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Select due notifications and dispatch each one. A failure on one
    /// notification is logged and counted; the rest of the batch proceeds.
    /// After shutdown the pass returns what it has without asking for a retry.
    pub async fn run(&self) -> Result<ProcessReport, PassError> {
        if self.cancel.is_cancelled() {
            return Ok(ProcessReport {
                interrupted: true,
                ..Default::default()
            });
        }
        let due = self.store.list_due(self.clock.now(), self.batch_size).await?;
        let mut report = ProcessReport {
            selected: due.len(),
            ..Default::default()
        };

        let results: Vec<(DbId, Result<_, DispatchError>)> = stream::iter(due.iter())
            .take_until(self.cancel.cancelled())
            .map(|notification| async move {
                (notification.id, self.dispatcher.process(notification).await)
            })
            .buffer_unordered(self.concurrency)
            .boxed()
            .collect()
            .await;

        report.interrupted = results.len() < due.len();

        let mut transient = 0;
        for (notification_id, result) in results {
            match result {
                Ok(outcome) if outcome.skipped.is_some() => report.skipped += 1,
                Ok(outcome) => {
                    report.interrupted |= outcome.interrupted;
                    report.processed += 1;
                    report.eligible += outcome.eligible;
                    report.delivered += outcome.delivered;
                    report.suppressed += outcome.suppressed;
                    report.failed += outcome.failed;
                }
                Err(e) => {
                    report.errors += 1;
                    if e.is_transient() {
                        transient += 1;
                    }
                    tracing::error!(
                        notification_id,
                        transient = e.is_transient(),
                        error = %e,
                        "Notification dispatch failed"
                    );
                }
            }
        }

        tracing::info!(
            selected = report.selected,
            processed = report.processed,
            skipped = report.skipped,
            errors = report.errors,
            delivered = report.delivered,
            suppressed = report.suppressed,
            failed = report.failed,
            interrupted = report.interrupted,
            "Process pass finished"
        );

        if transient > 0 && !self.cancel.is_cancelled() {
            return Err(PassError::Transient { count: transient });
        }
        Ok(report)
    }
}
