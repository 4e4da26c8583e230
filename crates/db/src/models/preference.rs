//! Per-user notification preference models.

use chrono::NaiveTime;
use geonotify_core::error::CoreError;
use geonotify_core::geo::{validate_coordinates, validate_radius};
use geonotify_core::notification::{DeliveryChannel, FavoriteLocation, FrequencyClass, NotificationType};
use geonotify_core::quiet_hours::{parse_zone, QuietHours};
use geonotify_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::{Validate, ValidationError};

/// Personal radius applied to favorites when none is given.
pub const DEFAULT_NOTIFICATION_RADIUS_M: i32 = 10_000;

/// A row from the `notification_preferences` table.
///
/// Created lazily with the column defaults on first access.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub id: DbId,
    pub user_id: DbId,
    pub nearby_rentals: bool,
    pub pickup_reminders: bool,
    pub area_alerts: bool,
    pub promotional: bool,
    pub new_listings: bool,
    pub price_drops: bool,
    pub share_location: bool,
    pub notification_radius: i32,
    pub quiet_hours_enabled: bool,
    pub quiet_hours_start: Option<NaiveTime>,
    pub quiet_hours_end: Option<NaiveTime>,
    /// IANA zone name; `None` uses the engine default.
    pub timezone: Option<String>,
    #[sqlx(try_from = "String")]
    pub frequency: FrequencyClass,
    /// `None` means unrestricted.
    pub max_per_day: Option<i32>,
    pub push_enabled: bool,
    pub email_enabled: bool,
    pub sms_enabled: bool,
    #[sqlx(json)]
    pub favorite_locations: Vec<FavoriteLocation>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl NotificationPreferences {
    /// In-memory defaults matching the table's column defaults.
    pub fn defaults_for(user_id: DbId, now: Timestamp) -> Self {
        Self {
            id: 0,
            user_id,
            nearby_rentals: true,
            pickup_reminders: true,
            area_alerts: true,
            promotional: true,
            new_listings: true,
            price_drops: true,
            share_location: true,
            notification_radius: DEFAULT_NOTIFICATION_RADIUS_M,
            quiet_hours_enabled: false,
            quiet_hours_start: None,
            quiet_hours_end: None,
            timezone: None,
            frequency: FrequencyClass::Realtime,
            max_per_day: None,
            push_enabled: true,
            email_enabled: true,
            sms_enabled: true,
            favorite_locations: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Category opt-in for a notification type.
    pub fn category_enabled(&self, notification_type: NotificationType) -> bool {
        match notification_type {
            NotificationType::NearbyRental => self.nearby_rentals,
            NotificationType::PickupReminder => self.pickup_reminders,
            NotificationType::AreaAlert => self.area_alerts,
            NotificationType::Promotional => self.promotional,
            NotificationType::NewListing => self.new_listings,
            NotificationType::PriceDrop => self.price_drops,
        }
    }

    /// The configured quiet-hours window, if enabled and fully specified.
    pub fn quiet_hours(&self) -> Option<QuietHours> {
        if !self.quiet_hours_enabled {
            return None;
        }
        match (self.quiet_hours_start, self.quiet_hours_end) {
            (Some(start), Some(end)) => Some(QuietHours::new(start, end)),
            _ => None,
        }
    }

    /// Channel toggle. The in-app channel is always on.
    pub fn channel_enabled(&self, channel: DeliveryChannel) -> bool {
        match channel {
            DeliveryChannel::Database => true,
            DeliveryChannel::Mail => self.email_enabled,
            DeliveryChannel::Push => self.push_enabled,
            DeliveryChannel::Sms => self.sms_enabled,
        }
    }
}

/// DTO for updating preferences. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateNotificationPreferences {
    pub nearby_rentals: Option<bool>,
    pub pickup_reminders: Option<bool>,
    pub area_alerts: Option<bool>,
    pub promotional: Option<bool>,
    pub new_listings: Option<bool>,
    pub price_drops: Option<bool>,
    pub share_location: Option<bool>,
    #[validate(range(min = 100, max = 100000))]
    pub notification_radius: Option<i32>,
    pub quiet_hours_enabled: Option<bool>,
    pub quiet_hours_start: Option<NaiveTime>,
    pub quiet_hours_end: Option<NaiveTime>,
    /// IANA zone name.
    #[validate(custom(function = "validate_timezone"))]
    pub timezone: Option<String>,
    pub frequency: Option<FrequencyClass>,
    #[validate(range(min = 0))]
    pub max_per_day: Option<i32>,
    pub push_enabled: Option<bool>,
    pub email_enabled: Option<bool>,
    pub sms_enabled: Option<bool>,
    #[validate(custom(function = "validate_favorites"))]
    pub favorite_locations: Option<Vec<FavoriteLocation>>,
}

impl UpdateNotificationPreferences {
    /// Run the field rules, reporting failures as [`CoreError::Validation`].
    pub fn check(&self) -> Result<(), CoreError> {
        self.validate()
            .map_err(|e| CoreError::Validation(e.to_string()))
    }
}

fn rejected(code: &'static str, error: CoreError) -> ValidationError {
    let mut invalid = ValidationError::new(code);
    invalid.message = Some(error.to_string().into());
    invalid
}

fn validate_timezone(name: &str) -> Result<(), ValidationError> {
    parse_zone(name)
        .map(|_| ())
        .map_err(|e| rejected("timezone", e))
}

fn validate_favorites(favorites: &[FavoriteLocation]) -> Result<(), ValidationError> {
    for favorite in favorites {
        validate_coordinates(favorite.latitude, favorite.longitude)
            .and_then(|()| validate_radius(favorite.radius))
            .map_err(|e| rejected("favorite_location", e))?;
    }
    Ok(())
}
