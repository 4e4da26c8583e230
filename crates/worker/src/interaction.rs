//! Recipient engagement events from the in-app center.
//!
//! An interaction advances the user's in-app delivery record and then the
//! notification aggregate. Both moves are compare-and-set; a lost race
//! reloads and re-plans, so the aggregate only ever moves forward.

use std::sync::Arc;

use geonotify_core::clock::Clock;
use geonotify_core::error::CoreError;
use geonotify_core::notification::{DeliveryChannel, DeliveryStatus, Interaction, NotificationStatus};
use geonotify_core::state_machine::{delivery_after_interaction, engagement_path};
use geonotify_core::types::DbId;

use crate::store::{NotificationStore, StoreError};

/// Reload-and-retry bound for compare-and-set races.
const MAX_CAS_ROUNDS: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum InteractionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InteractionOutcome {
    pub delivery_status: DeliveryStatus,
    pub notification_status: NotificationStatus,
}

pub struct InteractionRecorder {
    store: Arc<dyn NotificationStore>,
    clock: Arc<dyn Clock>,
}

impl InteractionRecorder {
    pub fn new(store: Arc<dyn NotificationStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Apply `interaction` for `user_id` on `notification_id`.
    ///
    /// Reading an already clicked record is a no-op. Interacting with a
    /// record that was never delivered is rejected.
    pub async fn record_interaction(
        &self,
        notification_id: DbId,
        user_id: DbId,
        interaction: Interaction,
    ) -> Result<InteractionOutcome, InteractionError> {
        let delivery_status = self
            .advance_delivery(notification_id, user_id, interaction)
            .await?;
        let notification_status = self
            .advance_aggregate(notification_id, interaction.into())
            .await?;

        tracing::debug!(
            notification_id,
            user_id,
            %interaction,
            %delivery_status,
            %notification_status,
            "Interaction recorded"
        );
        Ok(InteractionOutcome {
            delivery_status,
            notification_status,
        })
    }

    async fn advance_delivery(
        &self,
        notification_id: DbId,
        user_id: DbId,
        interaction: Interaction,
    ) -> Result<DeliveryStatus, InteractionError> {
        let target = DeliveryStatus::from(interaction);
        for _ in 0..MAX_CAS_ROUNDS {
            let record = self
                .store
                .find_delivery(notification_id, user_id, DeliveryChannel::Database)
                .await?
                .ok_or(CoreError::NotFound {
                    entity: "delivery_record",
                    id: notification_id,
                })?;

            if record.status == target || record.status == DeliveryStatus::Clicked {
                return Ok(record.status);
            }
            let to = delivery_after_interaction(record.status, interaction)?;
            if self
                .store
                .apply_delivery_interaction(record.id, record.status, to, self.clock.now())
                .await?
            {
                return Ok(to);
            }
        }
        Err(CoreError::Conflict(format!(
            "delivery record for notification {notification_id} kept changing"
        ))
        .into())
    }

    async fn advance_aggregate(
        &self,
        id: DbId,
        reached: NotificationStatus,
    ) -> Result<NotificationStatus, InteractionError> {
        for _ in 0..MAX_CAS_ROUNDS {
            let current = self
                .store
                .find_notification(id)
                .await?
                .ok_or(CoreError::NotFound {
                    entity: "notification",
                    id,
                })?
                .status;

            let mut at = current;
            let mut lost_race = false;
            for step in engagement_path(current, reached) {
                if !self
                    .store
                    .transition_status(id, at, step, self.clock.now())
                    .await?
                {
                    lost_race = true;
                    break;
                }
                at = step;
            }
            if !lost_race {
                return Ok(at);
            }
        }
        Err(CoreError::Conflict(format!("notification {id} kept changing")).into())
    }
}
