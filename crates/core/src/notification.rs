//! Notification vocabulary: types, statuses, channels, frequency classes.
//!
//! Every enum here is stored as a lowercase snake_case `TEXT` column, so
//! each one round-trips through [`as_str`](NotificationStatus::as_str) and
//! `TryFrom<String>`.

use serde::{Deserialize, Serialize};

#[cfg(test)]
use crate::error::CoreError;

define_text_enum! {
    /// What a notification is about. Each type maps to one category toggle.
    NotificationType {
        NearbyRental => "nearby_rental",
        PickupReminder => "pickup_reminder",
        AreaAlert => "area_alert",
        Promotional => "promotional",
        NewListing => "new_listing",
        PriceDrop => "price_drop",
    }
}

define_text_enum! {
    /// Aggregate lifecycle status of a notification.
    NotificationStatus {
        Pending => "pending",
        Sent => "sent",
        Read => "read",
        Clicked => "clicked",
        Failed => "failed",
        Expired => "expired",
    }
}

define_text_enum! {
    /// A delivery channel. `Database` is the in-app inbox.
    DeliveryChannel {
        Database => "database",
        Mail => "mail",
        Push => "push",
        Sms => "sms",
    }
}

define_text_enum! {
    /// Per (notification, user, channel) delivery outcome.
    DeliveryStatus {
        Queued => "queued",
        Sent => "sent",
        Failed => "failed",
        Read => "read",
        Clicked => "clicked",
    }
}

define_text_enum! {
    /// How often a user is willing to be notified.
    FrequencyClass {
        Realtime => "realtime",
        Hourly => "hourly",
        Daily => "daily",
        Weekly => "weekly",
    }
}

define_text_enum! {
    /// Recipient engagement signal reported by the in-app center.
    Interaction {
        Read => "read",
        Clicked => "clicked",
    }
}

impl NotificationType {
    /// Name of the preference toggle gating this type.
    pub fn preference_field(self) -> &'static str {
        match self {
            NotificationType::NearbyRental => "nearby_rentals",
            NotificationType::PickupReminder => "pickup_reminders",
            NotificationType::AreaAlert => "area_alerts",
            NotificationType::Promotional => "promotional",
            NotificationType::NewListing => "new_listings",
            NotificationType::PriceDrop => "price_drops",
        }
    }
}

impl NotificationStatus {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NotificationStatus::Clicked | NotificationStatus::Failed | NotificationStatus::Expired
        )
    }

    /// Position along the engagement chain `pending -> sent -> read -> clicked`.
    ///
    /// `None` for states off the chain (`failed`, `expired`).
    pub fn engagement_rank(self) -> Option<u8> {
        match self {
            NotificationStatus::Pending => Some(0),
            NotificationStatus::Sent => Some(1),
            NotificationStatus::Read => Some(2),
            NotificationStatus::Clicked => Some(3),
            NotificationStatus::Failed | NotificationStatus::Expired => None,
        }
    }
}

impl DeliveryStatus {
    /// A delivery that reached the recipient.
    pub fn is_delivered(self) -> bool {
        matches!(
            self,
            DeliveryStatus::Sent | DeliveryStatus::Read | DeliveryStatus::Clicked
        )
    }
}

impl FrequencyClass {
    /// Minimum gap between two successful deliveries to the same user.
    pub fn min_spacing(self) -> Option<chrono::Duration> {
        match self {
            FrequencyClass::Realtime => None,
            FrequencyClass::Hourly => Some(chrono::Duration::hours(1)),
            FrequencyClass::Daily => Some(chrono::Duration::days(1)),
            FrequencyClass::Weekly => Some(chrono::Duration::days(7)),
        }
    }
}

impl From<Interaction> for NotificationStatus {
    fn from(value: Interaction) -> Self {
        match value {
            Interaction::Read => NotificationStatus::Read,
            Interaction::Clicked => NotificationStatus::Clicked,
        }
    }
}

impl From<Interaction> for DeliveryStatus {
    fn from(value: Interaction) -> Self {
        match value {
            Interaction::Read => DeliveryStatus::Read,
            Interaction::Clicked => DeliveryStatus::Clicked,
        }
    }
}

/// A saved place a user wants alerts around, with its own radius.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FavoriteLocation {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius: i32,
}

impl FavoriteLocation {
    pub fn point(&self) -> crate::geo::GeoPoint {
        crate::geo::GeoPoint::new(self.latitude, self.longitude)
    }
}
