//! Legal status transitions for notifications and delivery records.
//!
//! Callers never write a status directly; they ask for a transition and
//! the store applies it as a compare-and-set on the current value.

use crate::error::CoreError;
use crate::notification::{DeliveryStatus, Interaction, NotificationStatus};

// ---------------------------------------------------------------------------
// Notification aggregate
// ---------------------------------------------------------------------------

/// Target statuses reachable from `from`.
///
/// Expiry only overrides `pending` or `sent`; engagement (`read`,
/// `clicked`) is never erased.
pub fn notification_transitions(from: NotificationStatus) -> &'static [NotificationStatus] {
    use NotificationStatus::*;
    match from {
        Pending => &[Sent, Failed, Expired],
        Sent => &[Read, Clicked, Expired],
        Read => &[Clicked],
        Clicked | Failed | Expired => &[],
    }
}

pub fn can_transition(from: NotificationStatus, to: NotificationStatus) -> bool {
    notification_transitions(from).contains(&to)
}

/// Statuses the cleanup pass may move to `expired`.
pub fn expirable_statuses() -> impl Iterator<Item = NotificationStatus> {
    NotificationStatus::ALL
        .iter()
        .copied()
        .filter(|status| can_transition(*status, NotificationStatus::Expired))
}

pub fn validate_transition(
    from: NotificationStatus,
    to: NotificationStatus,
) -> Result<(), CoreError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Steps that move the aggregate forward to reflect a recipient reaching
/// `reached`, or an empty list when the aggregate is already there (or
/// beyond, or off the engagement chain).
///
/// An interaction implies a successful delivery, so a still-`pending`
/// aggregate first steps to `sent`.
pub fn engagement_path(
    current: NotificationStatus,
    reached: NotificationStatus,
) -> Vec<NotificationStatus> {
    let (Some(cur), Some(target)) = (current.engagement_rank(), reached.engagement_rank()) else {
        return Vec::new();
    };
    if target <= cur {
        return Vec::new();
    }

    let mut path = Vec::new();
    let mut at = current;
    if at == NotificationStatus::Pending {
        at = NotificationStatus::Sent;
        path.push(at);
    }
    if at != reached && can_transition(at, reached) {
        path.push(reached);
    }
    path
}

// ---------------------------------------------------------------------------
// Delivery records
// ---------------------------------------------------------------------------

/// Target statuses reachable from a delivery record in `from`.
pub fn delivery_transitions(from: DeliveryStatus) -> &'static [DeliveryStatus] {
    use DeliveryStatus::*;
    match from {
        Queued => &[Sent, Failed],
        Sent => &[Read, Clicked],
        Read => &[Clicked],
        Failed | Clicked => &[],
    }
}

pub fn can_transition_delivery(from: DeliveryStatus, to: DeliveryStatus) -> bool {
    delivery_transitions(from).contains(&to)
}

pub fn validate_delivery_transition(
    from: DeliveryStatus,
    to: DeliveryStatus,
) -> Result<(), CoreError> {
    if can_transition_delivery(from, to) {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// The delivery status an interaction moves a record to, if legal.
pub fn delivery_after_interaction(
    current: DeliveryStatus,
    interaction: Interaction,
) -> Result<DeliveryStatus, CoreError> {
    let to = DeliveryStatus::from(interaction);
    validate_delivery_transition(current, to)?;
    Ok(to)
}
