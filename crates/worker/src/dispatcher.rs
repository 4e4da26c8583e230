//! One processing pass over one notification.
//!
//! The pass takes a lease on the notification row, computes eligible users,
//! runs each through the preference gate and fans out over the allowed
//! channels. Every `(notification, user, channel)` slot is reserved in the
//! store before anything is sent, so concurrent or repeated passes never
//! send twice. A channel failure is recorded for that slot only.
//!
//! The aggregate status is settled only by a pass that visited every
//! recipient without a store error. An incomplete pass leaves the
//! notification `pending`; its unsettled `queued` slots are taken over by a
//! later pass once they are older than the lease.

use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use futures::stream::{self, StreamExt};
use geonotify_core::clock::Clock;
use geonotify_core::error::CoreError;
use geonotify_core::notification::{DeliveryChannel, DeliveryStatus, NotificationStatus};
use geonotify_core::types::{DbId, Timestamp};
use geonotify_db::models::notification::Notification;
use geonotify_events::{ChannelMessage, ChannelSenders, SendError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::eligibility::{EligibilityMatcher, EligibleRecipient, MatchError};
use crate::gate::{GateDecision, PreferenceGate};
use crate::store::{NotificationStore, StoreError};

/// Failure reason recorded when a user has a channel enabled that has no sender.
pub const CHANNEL_NOT_CONFIGURED: &str = "channel not configured";

// ---------------------------------------------------------------------------
// Settings and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub fanout_concurrency: usize,
    pub channel_timeout: Duration,
    pub claim_lease: chrono::Duration,
    pub max_attempts: i32,
    pub default_zone: Tz,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}

impl DispatchSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            fanout_concurrency: config.fanout_concurrency.max(1),
            channel_timeout: config.channel_timeout,
            claim_lease: config.claim_lease,
            max_attempts: config.dispatch_max_attempts,
            default_zone: config.default_timezone,
        }
    }
}

/// Why a pass did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotFound,
    Inactive,
    Expired,
    NotYetDue,
    NotPending,
    /// Another worker holds the lease.
    Claimed,
}

/// Counts from one pass. `delivered` and `failed` count `(user, channel)`
/// sends; `eligible` and `suppressed` count users.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub notification_id: DbId,
    pub skipped: Option<SkipReason>,
    pub eligible: usize,
    pub delivered: usize,
    pub suppressed: usize,
    pub failed: usize,
    /// Slots already recorded by an earlier or concurrent pass.
    pub duplicates: usize,
    /// The notification was deactivated while the pass was running.
    pub aborted: bool,
    /// Shutdown stopped the fan-out before every recipient was visited.
    pub interrupted: bool,
    /// Aggregate status after the pass.
    pub status: Option<NotificationStatus>,
}

impl DispatchOutcome {
    fn new(notification_id: DbId) -> Self {
        Self {
            notification_id,
            ..Default::default()
        }
    }

    fn skipped(notification_id: DbId, reason: SkipReason) -> Self {
        Self {
            notification_id,
            skipped: Some(reason),
            ..Default::default()
        }
    }

    fn absorb(&mut self, recipient: RecipientOutcome) {
        self.delivered += recipient.delivered;
        self.failed += recipient.failed;
        self.duplicates += recipient.duplicates;
        self.suppressed += usize::from(recipient.suppressed);
        self.aborted |= recipient.aborted;
    }
}

#[derive(Debug, Default)]
struct RecipientOutcome {
    suppressed: bool,
    delivered: usize,
    failed: usize,
    duplicates: usize,
    aborted: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Target criteria could not be evaluated. The pass counts as a failed
    /// attempt; the notification fails once the attempts run out.
    #[error(transparent)]
    Criteria(CoreError),
}

impl DispatchError {
    pub fn is_transient(&self) -> bool {
        match self {
            DispatchError::Store(e) => e.is_transient(),
            DispatchError::Criteria(_) => false,
        }
    }
}

/// Skip checks applied before and after taking the lease.
pub fn precondition(notification: &Notification, now: Timestamp) -> Option<SkipReason> {
    if !notification.is_active {
        Some(SkipReason::Inactive)
    } else if notification.is_expired_at(now) {
        Some(SkipReason::Expired)
    } else if notification.is_scheduled_after(now) {
        Some(SkipReason::NotYetDue)
    } else if notification.status != NotificationStatus::Pending {
        Some(SkipReason::NotPending)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct DeliveryDispatcher {
    store: Arc<dyn NotificationStore>,
    matcher: EligibilityMatcher,
    gate: PreferenceGate,
    senders: ChannelSenders,
    clock: Arc<dyn Clock>,
    settings: DispatchSettings,
    cancel: CancellationToken,
}

impl DeliveryDispatcher {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        senders: ChannelSenders,
        clock: Arc<dyn Clock>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            matcher: EligibilityMatcher::new(Arc::clone(&store)),
            gate: PreferenceGate::new(Arc::clone(&store), settings.default_zone),
            store,
            senders,
            clock,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop starting new recipients once `cancel` fires. Recipients already
    /// in flight finish their sends.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn matcher(&self) -> &EligibilityMatcher {
        &self.matcher
    }

    /// Load and process a notification by id.
    pub async fn process_by_id(&self, id: DbId) -> Result<DispatchOutcome, DispatchError> {
        match self.store.find_notification(id).await? {
            Some(notification) => self.process(&notification).await,
            None => Ok(DispatchOutcome::skipped(id, SkipReason::NotFound)),
        }
    }

    /// Run one pass. Skips are `Ok` with [`DispatchOutcome::skipped`] set.
    pub async fn process(&self, notification: &Notification) -> Result<DispatchOutcome, DispatchError> {
        let id = notification.id;
        let now = self.clock.now();
        if let Some(reason) = precondition(notification, now) {
            tracing::debug!(notification_id = id, ?reason, "Dispatch skipped");
            return Ok(DispatchOutcome::skipped(id, reason));
        }

        let token = Uuid::now_v7();
        let Some(claimed) = self
            .store
            .try_claim(id, token, now, self.settings.claim_lease)
            .await?
        else {
            tracing::debug!(notification_id = id, "Notification claimed by another worker");
            return Ok(DispatchOutcome::skipped(id, SkipReason::Claimed));
        };

        // The row may have moved since it was selected.
        let result = match precondition(&claimed, now) {
            Some(reason) => Ok(DispatchOutcome::skipped(id, reason)),
            None => self.dispatch_claimed(&claimed).await,
        };

        if let Err(e) = self.store.release_claim(id, token).await {
            tracing::warn!(notification_id = id, error = %e, "Failed to release lease; it will expire");
        }
        result
    }

    async fn dispatch_claimed(&self, notification: &Notification) -> Result<DispatchOutcome, DispatchError> {
        let id = notification.id;
        let eligible = match self.matcher.eligible_users(notification).await {
            Ok(eligible) => eligible,
            Err(MatchError::Store(e)) => return Err(e.into()),
            Err(MatchError::Criteria(e)) => {
                tracing::error!(notification_id = id, error = %e, "Malformed criteria, dispatch pass failed");
                self.count_failed_pass(id, &e.to_string(), true).await?;
                return Err(DispatchError::Criteria(e));
            }
        };

        let mut outcome = DispatchOutcome::new(id);
        outcome.eligible = eligible.len();

        let results: Vec<Result<RecipientOutcome, StoreError>> = stream::iter(eligible.iter())
            .take_until(self.cancel.cancelled())
            .map(|recipient| self.deliver_to(notification, recipient))
            .buffer_unordered(self.settings.fanout_concurrency)
            .boxed()
            .collect()
            .await;
        outcome.interrupted = results.len() < eligible.len();

        let mut first_error = None;
        for result in results {
            match result {
                Ok(recipient) => outcome.absorb(recipient),
                Err(e) => {
                    tracing::error!(notification_id = id, error = %e, "Recipient dispatch failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        if first_error.is_some() || outcome.interrupted {
            tracing::warn!(
                notification_id = id,
                delivered = outcome.delivered,
                interrupted = outcome.interrupted,
                "Dispatch pass incomplete, notification stays pending"
            );
            return match first_error {
                Some(e) => Err(e.into()),
                None => {
                    outcome.status = Some(NotificationStatus::Pending);
                    Ok(outcome)
                }
            };
        }

        outcome.status = Some(self.settle(notification).await?);

        tracing::info!(
            notification_id = id,
            eligible = outcome.eligible,
            delivered = outcome.delivered,
            suppressed = outcome.suppressed,
            failed = outcome.failed,
            duplicates = outcome.duplicates,
            aborted = outcome.aborted,
            status = ?outcome.status,
            "Dispatch pass finished"
        );
        Ok(outcome)
    }

    /// Gate one user and send over each allowed channel in turn.
    async fn deliver_to(
        &self,
        notification: &Notification,
        recipient: &EligibleRecipient,
    ) -> Result<RecipientOutcome, StoreError> {
        let user_id = recipient.user_id();
        let decision = self
            .gate
            .allowed_channels(&recipient.preferences, notification.notification_type, self.clock.now())
            .await?;
        let channels = match decision {
            GateDecision::Deliver(channels) => channels,
            GateDecision::Suppressed(reason) => {
                tracing::debug!(
                    notification_id = notification.id,
                    user_id,
                    reason = reason.as_str(),
                    "Delivery suppressed by preferences"
                );
                return Ok(RecipientOutcome {
                    suppressed: true,
                    ..Default::default()
                });
            }
        };

        let mut out = RecipientOutcome::default();
        for channel in channels {
            if !self.store.is_active(notification.id).await? {
                tracing::info!(notification_id = notification.id, user_id, "Notification deactivated, stopping sends");
                out.aborted = true;
                break;
            }

            let now = self.clock.now();
            let Some(record_id) = self
                .store
                .try_reserve_delivery(notification.id, user_id, channel, now, now - self.settings.claim_lease)
                .await?
            else {
                out.duplicates += 1;
                continue;
            };

            match self.send(notification, recipient, channel).await {
                Ok(()) => {
                    self.store
                        .complete_delivery(record_id, DeliveryStatus::Sent, None, self.clock.now())
                        .await?;
                    out.delivered += 1;
                }
                Err(reason) => {
                    tracing::warn!(
                        notification_id = notification.id,
                        user_id,
                        %channel,
                        reason = %reason,
                        "Channel delivery failed"
                    );
                    self.store
                        .complete_delivery(record_id, DeliveryStatus::Failed, Some(&reason), self.clock.now())
                        .await?;
                    out.failed += 1;
                }
            }
        }
        Ok(out)
    }

    /// One attempt on one channel. The in-app channel is the record itself.
    async fn send(
        &self,
        notification: &Notification,
        recipient: &EligibleRecipient,
        channel: DeliveryChannel,
    ) -> Result<(), String> {
        if channel == DeliveryChannel::Database {
            return Ok(());
        }
        let Some(sender) = self.senders.get(channel) else {
            return Err(CHANNEL_NOT_CONFIGURED.to_string());
        };

        let message = ChannelMessage::render(notification, channel);
        let budget = self.settings.channel_timeout;
        match tokio::time::timeout(budget, sender.send(&recipient.recipient, &message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(SendError::Timeout(budget).to_string()),
        }
    }

    /// Update the aggregate status from the recorded deliveries.
    async fn settle(&self, notification: &Notification) -> Result<NotificationStatus, StoreError> {
        let id = notification.id;
        let now = self.clock.now();
        let summary = self.store.delivery_summary(id).await?;

        // Slots left unsettled by an earlier pass still have to go out.
        if summary.queued > 0 {
            tracing::debug!(notification_id = id, queued = summary.queued, "Unsettled slots remain");
            return Ok(NotificationStatus::Pending);
        }

        if summary.delivered > 0 {
            let moved = self
                .store
                .transition_status(id, NotificationStatus::Pending, NotificationStatus::Sent, now)
                .await?;
            if moved {
                return Ok(NotificationStatus::Sent);
            }
            return self.current_status(id).await;
        }

        // Nobody reached yet (no eligible users, or all suppressed): stay pending.
        if summary.total == 0 {
            return Ok(NotificationStatus::Pending);
        }

        let error = format!("{} of {} deliveries failed", summary.failed, summary.total);
        self.count_failed_pass(id, &error, summary.all_failed()).await
    }

    /// Count a pass that delivered nothing. Once `max_attempts` passes have
    /// been counted and `exhausting` holds, the notification is failed.
    async fn count_failed_pass(
        &self,
        id: DbId,
        error: &str,
        exhausting: bool,
    ) -> Result<NotificationStatus, StoreError> {
        let now = self.clock.now();
        let attempts = self.store.record_dispatch_attempt(id, Some(error), now).await?;
        if !exhausting || attempts < self.settings.max_attempts {
            return Ok(NotificationStatus::Pending);
        }
        let moved = self
            .store
            .transition_status(id, NotificationStatus::Pending, NotificationStatus::Failed, now)
            .await?;
        if moved {
            tracing::warn!(notification_id = id, attempts, error, "Dispatch attempts exhausted, notification failed");
            return Ok(NotificationStatus::Failed);
        }
        self.current_status(id).await
    }

    async fn current_status(&self, id: DbId) -> Result<NotificationStatus, StoreError> {
        Ok(self
            .store
            .find_notification(id)
            .await?
            .map(|n| n.status)
            .unwrap_or(NotificationStatus::Pending))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use geonotify_core::notification::NotificationType;
    use serde_json::json;

    fn notification() -> Notification {
        let now = Utc::now();
        Notification {
            id: 4,
            notification_type: NotificationType::AreaAlert,
            title: "Road closed".into(),
            message: "Avoid the bridge".into(),
            latitude: 0.0,
            longitude: 0.0,
            radius: 1000,
            location_name: None,
            target_criteria: json!({}),
            data: json!({}),
            is_active: true,
            expires_at: None,
            scheduled_for: None,
            status: NotificationStatus::Pending,
            status_changed_at: now,
            dispatch_attempts: 0,
            last_error: None,
            claim_token: None,
            claim_expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn preconditions_in_order() {
        let now = Utc::now();
        assert_eq!(precondition(&notification(), now), None);

        let mut n = notification();
        n.is_active = false;
        n.expires_at = Some(now);
        assert_eq!(precondition(&n, now), Some(SkipReason::Inactive));

        let mut n = notification();
        n.expires_at = Some(now);
        assert_eq!(precondition(&n, now), Some(SkipReason::Expired));

        let mut n = notification();
        n.scheduled_for = Some(now + ChronoDuration::seconds(1));
        assert_eq!(precondition(&n, now), Some(SkipReason::NotYetDue));

        let mut n = notification();
        n.scheduled_for = Some(now);
        assert_eq!(precondition(&n, now), None);

        let mut n = notification();
        n.status = NotificationStatus::Sent;
        assert_eq!(precondition(&n, now), Some(SkipReason::NotPending));
    }

    #[test]
    fn outcome_absorbs_recipient_counts() {
        let mut outcome = DispatchOutcome::new(1);
        outcome.absorb(RecipientOutcome {
            delivered: 2,
            failed: 1,
            ..Default::default()
        });
        outcome.absorb(RecipientOutcome {
            suppressed: true,
            ..Default::default()
        });
        outcome.absorb(RecipientOutcome {
            duplicates: 1,
            aborted: true,
            ..Default::default()
        });
        assert_eq!(
            (outcome.delivered, outcome.failed, outcome.suppressed, outcome.duplicates),
            (2, 1, 1, 1)
        );
        assert!(outcome.aborted);
    }

    #[test]
    fn only_store_errors_can_be_transient() {
        let store = DispatchError::Store(StoreError::Unavailable("down".into()));
        let criteria = DispatchError::Criteria(CoreError::MalformedCriteria("x".into()));
        assert!(store.is_transient());
        assert!(!criteria.is_transient());
    }
}
