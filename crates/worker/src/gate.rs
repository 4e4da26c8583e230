//! Per-user preference gate.
//!
//! Rules run in order and the first failing one suppresses delivery for
//! this pass: category opt-in, quiet hours, daily cap, frequency spacing.
//! Suppression is not a failure; a later pass re-evaluates the user while
//! the notification is still pending.

use std::sync::Arc;

use chrono_tz::Tz;
use geonotify_core::notification::{DeliveryChannel, NotificationType};
use geonotify_core::quiet_hours::{resolve_zone, start_of_local_day};
use geonotify_core::types::Timestamp;
use geonotify_db::models::preference::NotificationPreferences;

use crate::store::{NotificationStore, StoreError};

/// Why a user was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    CategoryDisabled,
    QuietHours,
    DailyCap,
    FrequencySpacing,
}

impl SuppressReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SuppressReason::CategoryDisabled => "category_disabled",
            SuppressReason::QuietHours => "quiet_hours",
            SuppressReason::DailyCap => "daily_cap",
            SuppressReason::FrequencySpacing => "frequency_spacing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Deliver over these channels; always contains [`DeliveryChannel::Database`].
    Deliver(Vec<DeliveryChannel>),
    Suppressed(SuppressReason),
}

impl GateDecision {
    pub fn channels(&self) -> &[DeliveryChannel] {
        match self {
            GateDecision::Deliver(channels) => channels,
            GateDecision::Suppressed(_) => &[],
        }
    }
}

pub struct PreferenceGate {
    store: Arc<dyn NotificationStore>,
    default_zone: Tz,
}

impl PreferenceGate {
    pub fn new(store: Arc<dyn NotificationStore>, default_zone: Tz) -> Self {
        Self {
            store,
            default_zone,
        }
    }

    /// The user's zone, or the engine default when unset or unknown.
    pub fn zone_for(&self, prefs: &NotificationPreferences) -> Tz {
        resolve_zone(prefs.timezone.as_deref(), self.default_zone)
    }

    pub async fn allowed_channels(
        &self,
        prefs: &NotificationPreferences,
        notification_type: NotificationType,
        now: Timestamp,
    ) -> Result<GateDecision, StoreError> {
        if let Some(reason) = static_suppression(prefs, notification_type, now, self.zone_for(prefs)) {
            return Ok(GateDecision::Suppressed(reason));
        }
        if let Some(reason) = self.throttle(prefs, now).await? {
            return Ok(GateDecision::Suppressed(reason));
        }
        Ok(GateDecision::Deliver(channels_for(prefs)))
    }

    /// Daily cap then frequency spacing. Both need delivery history.
    async fn throttle(
        &self,
        prefs: &NotificationPreferences,
        now: Timestamp,
    ) -> Result<Option<SuppressReason>, StoreError> {
        if let Some(cap) = prefs.max_per_day {
            let since = start_of_local_day(now, self.zone_for(prefs));
            let delivered = self
                .store
                .delivered_notifications_since(prefs.user_id, since)
                .await?;
            if delivered >= i64::from(cap) {
                return Ok(Some(SuppressReason::DailyCap));
            }
        }

        if let Some(spacing) = prefs.frequency.min_spacing() {
            if let Some(last) = self.store.last_delivered_at(prefs.user_id).await? {
                if now - last < spacing {
                    return Ok(Some(SuppressReason::FrequencySpacing));
                }
            }
        }
        Ok(None)
    }
}

/// Rules that need no delivery history: category and quiet hours.
pub fn static_suppression(
    prefs: &NotificationPreferences,
    notification_type: NotificationType,
    now: Timestamp,
    zone: Tz,
) -> Option<SuppressReason> {
    if !prefs.category_enabled(notification_type) {
        return Some(SuppressReason::CategoryDisabled);
    }
    if prefs.quiet_hours().is_some_and(|q| q.is_active(now, zone)) {
        return Some(SuppressReason::QuietHours);
    }
    None
}

/// In-app first, then each enabled external channel.
pub fn channels_for(prefs: &NotificationPreferences) -> Vec<DeliveryChannel> {
    DeliveryChannel::ALL
        .iter()
        .copied()
        .filter(|channel| prefs.channel_enabled(*channel))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone, Utc};

    fn prefs() -> NotificationPreferences {
        NotificationPreferences::defaults_for(5, Utc::now())
    }

    fn with_quiet_hours(mut p: NotificationPreferences) -> NotificationPreferences {
        p.quiet_hours_enabled = true;
        p.quiet_hours_start = NaiveTime::from_hms_opt(22, 0, 0);
        p.quiet_hours_end = NaiveTime::from_hms_opt(7, 0, 0);
        p
    }

    #[test]
    fn category_opt_out_suppresses() {
        let mut p = prefs();
        p.price_drops = false;
        let now = Utc::now();
        assert_eq!(
            static_suppression(&p, NotificationType::PriceDrop, now, Tz::UTC),
            Some(SuppressReason::CategoryDisabled)
        );
        assert_eq!(
            static_suppression(&p, NotificationType::AreaAlert, now, Tz::UTC),
            None
        );
    }

    #[test]
    fn quiet_hours_in_local_time() {
        let p = with_quiet_hours(prefs());
        let at_23 = Utc.with_ymd_and_hms(2026, 3, 2, 23, 0, 0).unwrap();
        let at_08 = Utc.with_ymd_and_hms(2026, 3, 3, 8, 0, 0).unwrap();
        assert_eq!(
            static_suppression(&p, NotificationType::NearbyRental, at_23, Tz::UTC),
            Some(SuppressReason::QuietHours)
        );
        assert_eq!(
            static_suppression(&p, NotificationType::NearbyRental, at_08, Tz::UTC),
            None
        );
        // 08:00 UTC is 17:00 in Tokyo; 23:00 UTC is 08:00 the next morning.
        assert_eq!(
            static_suppression(&p, NotificationType::NearbyRental, at_23, chrono_tz::Asia::Tokyo),
            None
        );
    }

    #[test]
    fn database_channel_is_always_first() {
        let mut p = prefs();
        assert_eq!(
            channels_for(&p),
            vec![
                DeliveryChannel::Database,
                DeliveryChannel::Mail,
                DeliveryChannel::Push,
                DeliveryChannel::Sms
            ]
        );
        p.email_enabled = false;
        p.push_enabled = false;
        p.sms_enabled = false;
        assert_eq!(channels_for(&p), vec![DeliveryChannel::Database]);
    }

    #[test]
    fn suppressed_decision_has_no_channels() {
        assert!(GateDecision::Suppressed(SuppressReason::DailyCap)
            .channels()
            .is_empty());
    }
}
