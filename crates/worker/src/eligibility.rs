//! Recipient selection: geo radius, favorite locations and target criteria.

use std::collections::BTreeSet;
use std::sync::Arc;

use geonotify_core::criteria::TargetCriteria;
use geonotify_core::error::CoreError;
use geonotify_core::geo::{GeoPoint, MAX_RADIUS_M};
use geonotify_core::types::DbId;
use geonotify_db::models::notification::Notification;
use geonotify_db::models::preference::NotificationPreferences;
use geonotify_db::models::recipient::Recipient;

use crate::store::{Candidate, NotificationStore, StoreError};

/// Why a user matched a notification geographically.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchedLocation {
    /// The user's shared live position is inside the notification radius.
    Live { distance_m: f64 },
    /// One of the user's favorites covers the notification origin.
    Favorite { name: String, distance_m: f64 },
}

/// A user eligible for a notification.
#[derive(Debug, Clone)]
pub struct EligibleRecipient {
    pub recipient: Recipient,
    pub preferences: NotificationPreferences,
    pub matched: MatchedLocation,
}

impl EligibleRecipient {
    pub fn user_id(&self) -> DbId {
        self.recipient.id
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The notification's criteria cannot be evaluated. Permanent.
    #[error(transparent)]
    Criteria(CoreError),
}

/// Computes eligible recipients for a notification.
///
/// Eligibility is a pure function of the current store contents, so calling
/// it again after a crash yields the same set.
pub struct EligibilityMatcher {
    store: Arc<dyn NotificationStore>,
}

impl EligibilityMatcher {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self { store }
    }

    /// Every eligible user, once each, in user id order.
    pub async fn eligible_users(
        &self,
        notification: &Notification,
    ) -> Result<Vec<EligibleRecipient>, MatchError> {
        let criteria =
            TargetCriteria::parse(&notification.target_criteria).map_err(MatchError::Criteria)?;

        // Favorites can be up to MAX_RADIUS_M away, so the prefilter uses
        // the larger of the two radii.
        let search_radius = f64::from(notification.radius.max(MAX_RADIUS_M));
        let candidates = self
            .store
            .candidates(notification.origin(), search_radius)
            .await?;

        let mut seen = BTreeSet::new();
        let mut eligible: Vec<EligibleRecipient> = candidates
            .into_iter()
            .filter_map(|candidate| {
                let matched = match_candidate(notification, &criteria, &candidate)?;
                seen.insert(candidate.recipient.id).then_some(EligibleRecipient {
                    recipient: candidate.recipient,
                    preferences: candidate.preferences,
                    matched,
                })
            })
            .collect();
        eligible.sort_by_key(|e| e.user_id());

        tracing::debug!(
            notification_id = notification.id,
            eligible = eligible.len(),
            criteria = criteria.len(),
            "Eligibility computed"
        );
        Ok(eligible)
    }
}

/// Decide a single candidate: geo match (live OR favorite) AND criteria.
pub fn match_candidate(
    notification: &Notification,
    criteria: &TargetCriteria,
    candidate: &Candidate,
) -> Option<MatchedLocation> {
    if !candidate.recipient.is_active {
        return None;
    }
    let matched = geo_match(notification.origin(), notification.radius, candidate)?;
    if !criteria.is_empty() && !criteria.matches(&candidate.recipient.attribute_map()) {
        return None;
    }
    Some(matched)
}

fn geo_match(origin: GeoPoint, radius_m: i32, candidate: &Candidate) -> Option<MatchedLocation> {
    let prefs = &candidate.preferences;

    // Live position needs consent on both the profile and the preferences.
    let live = candidate
        .location
        .as_ref()
        .filter(|_| prefs.share_location)
        .and_then(|profile| profile.shared_point())
        .map(|point| point.distance_to(&origin))
        .filter(|distance| *distance <= f64::from(radius_m));
    if let Some(distance_m) = live {
        return Some(MatchedLocation::Live { distance_m });
    }

    prefs.favorite_locations.iter().find_map(|favorite| {
        let radius = if favorite.radius > 0 {
            favorite.radius
        } else {
            prefs.notification_radius
        };
        let distance_m = favorite.point().distance_to(&origin);
        (distance_m <= f64::from(radius)).then(|| MatchedLocation::Favorite {
            name: favorite.name.clone(),
            distance_m,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use geonotify_core::notification::{FavoriteLocation, NotificationStatus, NotificationType};
    use geonotify_db::models::location::UserLocationProfile;
    use serde_json::json;

    fn notification(criteria: serde_json::Value) -> Notification {
        let now = Utc::now();
        Notification {
            id: 1,
            notification_type: NotificationType::NewListing,
            title: "New listing".into(),
            message: "A cargo bike was listed nearby".into(),
            latitude: 48.8566,
            longitude: 2.3522,
            radius: 5000,
            location_name: None,
            target_criteria: criteria,
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

    fn candidate(position: Option<(f64, f64)>, attributes: serde_json::Value) -> Candidate {
        let now = Utc::now();
        Candidate {
            recipient: Recipient {
                id: 10,
                email: Some("a@example.com".into()),
                phone: None,
                push_token: None,
                attributes,
                is_active: true,
            },
            location: position.map(|(lat, lon)| UserLocationProfile {
                id: 1,
                user_id: 10,
                latitude: Some(lat),
                longitude: Some(lon),
                share_location: true,
                updated_at: now,
            }),
            preferences: NotificationPreferences::defaults_for(10, now),
        }
    }

    fn no_criteria() -> TargetCriteria {
        TargetCriteria::default()
    }

    // -----------------------------------------------------------------------
    // Geo matching
    // -----------------------------------------------------------------------

    #[test]
    fn user_within_radius_is_eligible() {
        let n = notification(json!({}));
        let c = candidate(Some((48.8606, 2.3376)), json!({}));
        let matched = match_candidate(&n, &no_criteria(), &c).unwrap();
        assert!(matches!(matched, MatchedLocation::Live { distance_m } if distance_m < 1200.0));
    }

    #[test]
    fn distant_user_is_not_eligible() {
        let n = notification(json!({}));
        let c = candidate(Some((48.9, 2.9)), json!({}));
        assert!(match_candidate(&n, &no_criteria(), &c).is_none());
    }

    #[test]
    fn live_location_requires_both_consents() {
        let n = notification(json!({}));
        let mut c = candidate(Some((48.8606, 2.3376)), json!({}));
        c.preferences.share_location = false;
        assert!(match_candidate(&n, &no_criteria(), &c).is_none());

        let mut c = candidate(Some((48.8606, 2.3376)), json!({}));
        if let Some(profile) = c.location.as_mut() {
            profile.share_location = false;
        }
        assert!(match_candidate(&n, &no_criteria(), &c).is_none());
    }

    #[test]
    fn favorite_uses_its_own_radius() {
        let n = notification(json!({}));
        // Live location far away; favorite ~40 km away with a 50 km radius.
        let mut c = candidate(Some((40.0, 2.0)), json!({}));
        c.preferences.favorite_locations = vec![FavoriteLocation {
            name: "Country house".into(),
            latitude: 48.9,
            longitude: 2.9,
            radius: 50_000,
        }];
        let matched = match_candidate(&n, &no_criteria(), &c).unwrap();
        assert!(matches!(matched, MatchedLocation::Favorite { ref name, .. } if name == "Country house"));

        c.preferences.favorite_locations[0].radius = 1000;
        assert!(match_candidate(&n, &no_criteria(), &c).is_none());
    }

    #[test]
    fn favorite_without_radius_falls_back_to_personal_radius() {
        let n = notification(json!({}));
        let mut c = candidate(None, json!({}));
        c.preferences.notification_radius = 2000;
        c.preferences.favorite_locations = vec![FavoriteLocation {
            name: "Office".into(),
            latitude: 48.8606,
            longitude: 2.3376,
            radius: 0,
        }];
        assert!(match_candidate(&n, &no_criteria(), &c).is_some());
    }

    #[test]
    fn no_location_and_no_favorites_never_matches() {
        let n = notification(json!({}));
        let c = candidate(None, json!({"tier": "gold"}));
        assert!(match_candidate(&n, &no_criteria(), &c).is_none());
    }

    #[test]
    fn inactive_users_are_excluded() {
        let n = notification(json!({}));
        let mut c = candidate(Some((48.8606, 2.3376)), json!({}));
        c.recipient.is_active = false;
        assert!(match_candidate(&n, &no_criteria(), &c).is_none());
    }

    // -----------------------------------------------------------------------
    // Criteria
    // -----------------------------------------------------------------------

    #[test]
    fn criteria_must_all_hold() {
        let raw = json!({"tier": ["gold", "silver"], "age": {"min": 18}});
        let n = notification(raw.clone());
        let criteria = TargetCriteria::parse(&raw).unwrap();

        let ok = candidate(Some((48.8606, 2.3376)), json!({"tier": "gold", "age": 30}));
        assert!(match_candidate(&n, &criteria, &ok).is_some());

        let young = candidate(Some((48.8606, 2.3376)), json!({"tier": "gold", "age": 16}));
        assert!(match_candidate(&n, &criteria, &young).is_none());
    }

    #[test]
    fn missing_attribute_fails_closed() {
        let raw = json!({"tier": "gold"});
        let n = notification(raw.clone());
        let criteria = TargetCriteria::parse(&raw).unwrap();
        let c = candidate(Some((48.8606, 2.3376)), json!({}));
        assert!(match_candidate(&n, &criteria, &c).is_none());
    }
}
