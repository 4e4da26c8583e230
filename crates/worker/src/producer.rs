//! Producer interface: create, optionally dispatch, and deactivate notifications.

use std::sync::Arc;

use geonotify_core::clock::Clock;
use geonotify_core::criteria::TargetCriteria;
use geonotify_core::error::CoreError;
use geonotify_core::geo::{validate_coordinates, validate_radius};
use geonotify_core::types::DbId;
use geonotify_db::models::notification::{CreateNotification, Notification};
use validator::Validate;

use crate::dispatcher::{DeliveryDispatcher, DispatchError, DispatchOutcome};
use crate::store::{NotificationStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ProduceError {
    /// Rejected at the boundary; nothing was stored.
    #[error(transparent)]
    Invalid(CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The notification was stored but the immediate pass failed.
    #[error("notification {notification_id} created but dispatch failed: {source}")]
    Dispatch {
        notification_id: DbId,
        #[source]
        source: DispatchError,
    },
}

#[derive(Debug, Clone)]
pub struct Created {
    pub notification: Notification,
    /// Present when immediate processing was requested.
    pub dispatch: Option<DispatchOutcome>,
}

/// Check everything that can be checked before insert.
pub fn validate_input(input: &CreateNotification) -> Result<(), CoreError> {
    input
        .validate()
        .map_err(|e| CoreError::Validation(e.to_string()))?;
    validate_coordinates(input.latitude, input.longitude)?;
    validate_radius(input.radius)?;
    TargetCriteria::parse(&input.target_criteria)?;

    if !(input.data.is_null() || input.data.is_object()) {
        return Err(CoreError::Validation("data must be a JSON object".into()));
    }
    if let (Some(scheduled), Some(expires)) = (input.scheduled_for, input.expires_at) {
        if expires <= scheduled {
            return Err(CoreError::Validation(
                "expires_at must be after scheduled_for".into(),
            ));
        }
    }
    Ok(())
}

pub struct NotificationProducer {
    store: Arc<dyn NotificationStore>,
    dispatcher: Arc<DeliveryDispatcher>,
    clock: Arc<dyn Clock>,
}

impl NotificationProducer {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        dispatcher: Arc<DeliveryDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            clock,
        }
    }

    /// Validate and store a new `pending` notification. With `trigger_now`
    /// it is processed right away instead of waiting for the next pass.
    pub async fn create_notification(
        &self,
        input: &CreateNotification,
        trigger_now: bool,
    ) -> Result<Created, ProduceError> {
        validate_input(input).map_err(ProduceError::Invalid)?;

        let notification = self.store.create_notification(input, self.clock.now()).await?;
        tracing::info!(
            notification_id = notification.id,
            notification_type = %notification.notification_type,
            radius = notification.radius,
            trigger_now,
            "Notification created"
        );

        if !trigger_now {
            return Ok(Created {
                notification,
                dispatch: None,
            });
        }

        let outcome = self
            .dispatcher
            .process(&notification)
            .await
            .map_err(|source| ProduceError::Dispatch {
                notification_id: notification.id,
                source,
            })?;

        // Reload so the caller sees the post-dispatch status.
        let notification = self
            .store
            .find_notification(notification.id)
            .await?
            .unwrap_or(notification);
        Ok(Created {
            notification,
            dispatch: Some(outcome),
        })
    }

    /// Stop a notification. In-flight passes stop before their next send.
    pub async fn deactivate(&self, id: DbId) -> Result<bool, StoreError> {
        let changed = self.store.deactivate(id, self.clock.now()).await?;
        if changed {
            tracing::info!(notification_id = id, "Notification deactivated");
        }
        Ok(changed)
    }
}
