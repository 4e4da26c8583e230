//! In-process [`NotificationStore`] with the same semantics as Postgres.
//!
//! Every operation runs under one mutex, so each call is atomic and
//! statistics are trivially a consistent snapshot. Used by the engine
//! tests and for dry runs without a database.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Duration;
use geonotify_core::geo::{latitude_delta_degrees, GeoPoint};
use geonotify_core::jobs::{JobKind, JobStatus};
use geonotify_core::notification::{DeliveryChannel, DeliveryStatus, NotificationStatus};
use geonotify_core::state_machine::{validate_delivery_transition, validate_transition};
use geonotify_core::types::{DbId, Timestamp};
use geonotify_db::models::background_job::BackgroundJob;
use geonotify_db::models::delivery::{DeliveryRecord, DeliverySummary};
use geonotify_db::models::location::UserLocationProfile;
use geonotify_db::models::notification::{CreateNotification, Notification, NotificationListQuery};
use geonotify_db::models::preference::{NotificationPreferences, UpdateNotificationPreferences};
use geonotify_db::models::recipient::Recipient;
use geonotify_db::models::statistics::NotificationStatistics;
use uuid::Uuid;

use super::{Candidate, NotificationStore, StoreError};

#[derive(Default)]
struct State {
    next_id: DbId,
    notifications: BTreeMap<DbId, Notification>,
    users: BTreeMap<DbId, Recipient>,
    /// Keyed by user id.
    locations: BTreeMap<DbId, UserLocationProfile>,
    /// Keyed by user id.
    preferences: BTreeMap<DbId, NotificationPreferences>,
    deliveries: BTreeMap<DbId, DeliveryRecord>,
    delivery_keys: HashMap<(DbId, DbId, DeliveryChannel), DbId>,
    jobs: BTreeMap<DbId, BackgroundJob>,
    injected_failures: u32,
}

impl State {
    fn next_id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Lock for a trait operation, consuming one injected failure if any.
    fn op(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        let mut state = self.lock();
        if state.injected_failures > 0 {
            state.injected_failures -= 1;
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        Ok(state)
    }

    // --- seeding and inspection ---

    /// Make the next `count` store operations fail with a transient error.
    pub fn fail_next(&self, count: u32) {
        self.lock().injected_failures = count;
    }

    /// Register a user with contact details and targeting attributes.
    pub fn insert_user(&self, recipient: Recipient) {
        self.lock().users.insert(recipient.id, recipient);
    }

    pub fn set_location(
        &self,
        user_id: DbId,
        position: Option<(f64, f64)>,
        share_location: bool,
        now: Timestamp,
    ) {
        let mut state = self.lock();
        let id = match state.locations.get(&user_id) {
            Some(existing) => existing.id,
            None => state.next_id(),
        };
        state.locations.insert(
            user_id,
            UserLocationProfile {
                id,
                user_id,
                latitude: position.map(|(lat, _)| lat),
                longitude: position.map(|(_, lon)| lon),
                share_location,
                updated_at: now,
            },
        );
    }

    pub fn set_preferences(&self, mut preferences: NotificationPreferences) {
        let mut state = self.lock();
        if preferences.id == 0 {
            preferences.id = state.next_id();
        }
        state.preferences.insert(preferences.user_id, preferences);
    }

    pub fn notification(&self, id: DbId) -> Option<Notification> {
        self.lock().notifications.get(&id).cloned()
    }

    pub fn deliveries(&self) -> Vec<DeliveryRecord> {
        self.lock().deliveries.values().cloned().collect()
    }

    pub fn jobs(&self) -> Vec<BackgroundJob> {
        self.lock().jobs.values().cloned().collect()
    }
}

fn is_delivered(record: &DeliveryRecord) -> bool {
    record.status.is_delivered()
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn create_notification(
        &self,
        input: &CreateNotification,
        now: Timestamp,
    ) -> Result<Notification, StoreError> {
        let mut state = self.op()?;
        let id = state.next_id();
        let object_or_empty = |v: &serde_json::Value| {
            if v.is_null() {
                serde_json::json!({})
            } else {
                v.clone()
            }
        };
        let notification = Notification {
            id,
            notification_type: input.notification_type,
            title: input.title.clone(),
            message: input.message.clone(),
            latitude: input.latitude,
            longitude: input.longitude,
            radius: input.radius,
            location_name: input.location_name.clone(),
            target_criteria: object_or_empty(&input.target_criteria),
            data: object_or_empty(&input.data),
            is_active: input.is_active.unwrap_or(true),
            expires_at: input.expires_at,
            scheduled_for: input.scheduled_for,
            status: NotificationStatus::Pending,
            status_changed_at: now,
            dispatch_attempts: 0,
            last_error: None,
            claim_token: None,
            claim_expires_at: None,
            created_at: now,
            updated_at: now,
        };
        state.notifications.insert(id, notification.clone());
        Ok(notification)
    }

    async fn find_notification(&self, id: DbId) -> Result<Option<Notification>, StoreError> {
        Ok(self.op()?.notifications.get(&id).cloned())
    }

    async fn list_notifications(
        &self,
        params: &NotificationListQuery,
    ) -> Result<Vec<Notification>, StoreError> {
        let state = self.op()?;
        let (limit, offset) = params.page();
        let needle = params.search_term().map(str::to_lowercase);

        let mut rows: Vec<&Notification> = state
            .notifications
            .values()
            .filter(|n| params.status.map_or(true, |s| n.status == s))
            .filter(|n| params.notification_type.map_or(true, |t| n.notification_type == t))
            .filter(|n| {
                needle.as_deref().map_or(true, |needle| {
                    n.title.to_lowercase().contains(needle)
                        || n.message.to_lowercase().contains(needle)
                        || n.location_name
                            .as_deref()
                            .is_some_and(|l| l.to_lowercase().contains(needle))
                })
            })
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(rows
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn list_due(&self, now: Timestamp, limit: i64) -> Result<Vec<Notification>, StoreError> {
        let state = self.op()?;
        let mut due: Vec<&Notification> = state
            .notifications
            .values()
            .filter(|n| n.is_active && n.status == NotificationStatus::Pending)
            .filter(|n| !n.is_scheduled_after(now) && !n.is_expired_at(now))
            .filter(|n| n.claim_expires_at.map_or(true, |at| at <= now))
            .collect();
        // NULL schedules first, then by schedule, then id.
        due.sort_by_key(|n| (n.scheduled_for.is_some(), n.scheduled_for, n.id));
        Ok(due.into_iter().take(limit.max(0) as usize).cloned().collect())
    }

    async fn try_claim(
        &self,
        id: DbId,
        token: Uuid,
        now: Timestamp,
        lease: Duration,
    ) -> Result<Option<Notification>, StoreError> {
        let mut state = self.op()?;
        let Some(n) = state.notifications.get_mut(&id) else {
            return Ok(None);
        };
        let lease_free = n.claim_expires_at.map_or(true, |at| at <= now);
        if n.status != NotificationStatus::Pending || !lease_free {
            return Ok(None);
        }
        n.claim_token = Some(token);
        n.claim_expires_at = Some(now + lease);
        Ok(Some(n.clone()))
    }

    async fn release_claim(&self, id: DbId, token: Uuid) -> Result<(), StoreError> {
        let mut state = self.op()?;
        if let Some(n) = state.notifications.get_mut(&id) {
            if n.claim_token == Some(token) {
                n.claim_token = None;
                n.claim_expires_at = None;
            }
        }
        Ok(())
    }

    async fn is_active(&self, id: DbId) -> Result<bool, StoreError> {
        Ok(self
            .op()?
            .notifications
            .get(&id)
            .is_some_and(|n| n.is_active))
    }

    async fn transition_status(
        &self,
        id: DbId,
        from: NotificationStatus,
        to: NotificationStatus,
        now: Timestamp,
    ) -> Result<bool, StoreError> {
        validate_transition(from, to)?;
        let mut state = self.op()?;
        match state.notifications.get_mut(&id) {
            Some(n) if n.status == from => {
                n.status = to;
                n.status_changed_at = now;
                n.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_dispatch_attempt(
        &self,
        id: DbId,
        error: Option<&str>,
        now: Timestamp,
    ) -> Result<i32, StoreError> {
        let mut state = self.op()?;
        Ok(match state.notifications.get_mut(&id) {
            Some(n) => {
                n.dispatch_attempts += 1;
                if let Some(error) = error {
                    n.last_error = Some(error.to_string());
                }
                n.updated_at = now;
                n.dispatch_attempts
            }
            None => 0,
        })
    }

    async fn deactivate(&self, id: DbId, now: Timestamp) -> Result<bool, StoreError> {
        let mut state = self.op()?;
        match state.notifications.get_mut(&id) {
            Some(n) if n.is_active => {
                n.is_active = false;
                n.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_due(&self, now: Timestamp) -> Result<u64, StoreError> {
        let mut state = self.op()?;
        let mut expired = 0;
        for n in state.notifications.values_mut() {
            if !n.is_expired_at(now) {
                continue;
            }
            if validate_transition(n.status, NotificationStatus::Expired).is_ok() {
                n.status = NotificationStatus::Expired;
                n.status_changed_at = now;
                n.updated_at = now;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn purge_terminal(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        let mut state = self.op()?;
        let doomed: Vec<DbId> = state
            .notifications
            .values()
            .filter(|n| n.status.is_terminal() && n.status_changed_at < cutoff)
            .map(|n| n.id)
            .collect();
        for id in &doomed {
            state.notifications.remove(id);
        }
        // Cascade like the foreign key does.
        let orphaned: Vec<DbId> = state
            .deliveries
            .values()
            .filter(|d| doomed.contains(&d.notification_id))
            .map(|d| d.id)
            .collect();
        for id in orphaned {
            if let Some(d) = state.deliveries.remove(&id) {
                state.delivery_keys.remove(&(d.notification_id, d.user_id, d.channel));
            }
        }
        Ok(doomed.len() as u64)
    }

    async fn candidates(&self, origin: GeoPoint, radius_m: f64) -> Result<Vec<Candidate>, StoreError> {
        let state = self.op()?;
        let delta = latitude_delta_degrees(radius_m);
        let band = (origin.latitude - delta)..=(origin.latitude + delta);

        Ok(state
            .users
            .values()
            .filter(|u| u.is_active)
            .filter(|u| {
                let in_band = state.locations.get(&u.id).is_some_and(|p| {
                    p.share_location && p.latitude.is_some_and(|lat| band.contains(&lat))
                });
                let has_favorites = state
                    .preferences
                    .get(&u.id)
                    .is_some_and(|p| !p.favorite_locations.is_empty());
                in_band || has_favorites
            })
            .map(|u| Candidate {
                recipient: u.clone(),
                location: state.locations.get(&u.id).cloned(),
                preferences: state.preferences.get(&u.id).cloned().unwrap_or_else(|| {
                    NotificationPreferences::defaults_for(u.id, Timestamp::default())
                }),
            })
            .collect())
    }

    async fn preferences(
        &self,
        user_id: DbId,
        now: Timestamp,
    ) -> Result<NotificationPreferences, StoreError> {
        let mut state = self.op()?;
        if let Some(existing) = state.preferences.get(&user_id) {
            return Ok(existing.clone());
        }
        let mut created = NotificationPreferences::defaults_for(user_id, now);
        created.id = state.next_id();
        state.preferences.insert(user_id, created.clone());
        Ok(created)
    }

    async fn update_preferences(
        &self,
        user_id: DbId,
        input: &UpdateNotificationPreferences,
        now: Timestamp,
    ) -> Result<NotificationPreferences, StoreError> {
        input.check()?;
        let mut state = self.op()?;
        let mut prefs = match state.preferences.get(&user_id) {
            Some(existing) => existing.clone(),
            None => {
                let mut created = NotificationPreferences::defaults_for(user_id, now);
                created.id = state.next_id();
                created
            }
        };

        macro_rules! apply {
            ($($field:ident),+ $(,)?) => {
                $( if let Some(v) = input.$field { prefs.$field = v; } )+
            };
        }
        apply!(
            nearby_rentals,
            pickup_reminders,
            area_alerts,
            promotional,
            new_listings,
            price_drops,
            share_location,
            notification_radius,
            quiet_hours_enabled,
            frequency,
            push_enabled,
            email_enabled,
            sms_enabled,
        );
        if input.quiet_hours_start.is_some() {
            prefs.quiet_hours_start = input.quiet_hours_start;
        }
        if input.quiet_hours_end.is_some() {
            prefs.quiet_hours_end = input.quiet_hours_end;
        }
        if input.timezone.is_some() {
            prefs.timezone = input.timezone.clone();
        }
        if input.max_per_day.is_some() {
            prefs.max_per_day = input.max_per_day;
        }
        if let Some(favorites) = &input.favorite_locations {
            prefs.favorite_locations = favorites.clone();
        }
        prefs.updated_at = now;

        state.preferences.insert(user_id, prefs.clone());
        Ok(prefs)
    }

    async fn prune_locations(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        let mut state = self.op()?;
        let before = state.locations.len();
        state.locations.retain(|_, p| p.updated_at >= cutoff);
        Ok((before - state.locations.len()) as u64)
    }

    async fn try_reserve_delivery(
        &self,
        notification_id: DbId,
        user_id: DbId,
        channel: DeliveryChannel,
        now: Timestamp,
        stale_before: Timestamp,
    ) -> Result<Option<DbId>, StoreError> {
        let mut state = self.op()?;
        let key = (notification_id, user_id, channel);
        if let Some(existing) = state.delivery_keys.get(&key).copied() {
            return Ok(state.deliveries.get_mut(&existing).and_then(|d| {
                let abandoned = d.status == DeliveryStatus::Queued && d.updated_at < stale_before;
                abandoned.then(|| {
                    d.updated_at = now;
                    d.id
                })
            }));
        }
        let id = state.next_id();
        state.delivery_keys.insert(key, id);
        state.deliveries.insert(
            id,
            DeliveryRecord {
                id,
                notification_id,
                user_id,
                channel,
                status: DeliveryStatus::Queued,
                failure_reason: None,
                created_at: now,
                delivered_at: None,
                updated_at: now,
            },
        );
        Ok(Some(id))
    }

    async fn complete_delivery(
        &self,
        id: DbId,
        outcome: DeliveryStatus,
        failure_reason: Option<&str>,
        now: Timestamp,
    ) -> Result<bool, StoreError> {
        validate_delivery_transition(DeliveryStatus::Queued, outcome)?;
        let mut state = self.op()?;
        match state.deliveries.get_mut(&id) {
            Some(d) if d.status == DeliveryStatus::Queued => {
                d.status = outcome;
                d.failure_reason = failure_reason.map(str::to_string);
                d.delivered_at = outcome.is_delivered().then_some(now);
                d.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delivered_notifications_since(
        &self,
        user_id: DbId,
        since: Timestamp,
    ) -> Result<i64, StoreError> {
        let state = self.op()?;
        let mut notifications: Vec<DbId> = state
            .deliveries
            .values()
            .filter(|d| d.user_id == user_id && is_delivered(d))
            .filter(|d| d.delivered_at.is_some_and(|at| at >= since))
            .map(|d| d.notification_id)
            .collect();
        notifications.sort_unstable();
        notifications.dedup();
        Ok(notifications.len() as i64)
    }

    async fn last_delivered_at(&self, user_id: DbId) -> Result<Option<Timestamp>, StoreError> {
        Ok(self
            .op()?
            .deliveries
            .values()
            .filter(|d| d.user_id == user_id && is_delivered(d))
            .filter_map(|d| d.delivered_at)
            .max())
    }

    async fn delivery_summary(&self, notification_id: DbId) -> Result<DeliverySummary, StoreError> {
        let state = self.op()?;
        let mut summary = DeliverySummary::default();
        for d in state.deliveries.values().filter(|d| d.notification_id == notification_id) {
            summary.total += 1;
            if is_delivered(d) {
                summary.delivered += 1;
            } else if d.status == DeliveryStatus::Failed {
                summary.failed += 1;
            } else if d.status == DeliveryStatus::Queued {
                summary.queued += 1;
            }
        }
        Ok(summary)
    }

    async fn find_delivery(
        &self,
        notification_id: DbId,
        user_id: DbId,
        channel: DeliveryChannel,
    ) -> Result<Option<DeliveryRecord>, StoreError> {
        let state = self.op()?;
        Ok(state
            .delivery_keys
            .get(&(notification_id, user_id, channel))
            .and_then(|id| state.deliveries.get(id))
            .cloned())
    }

    async fn list_deliveries(&self, notification_id: DbId) -> Result<Vec<DeliveryRecord>, StoreError> {
        let state = self.op()?;
        let mut records: Vec<DeliveryRecord> = state
            .deliveries
            .values()
            .filter(|d| d.notification_id == notification_id)
            .cloned()
            .collect();
        records.sort_by_key(|d| (d.user_id, d.channel));
        Ok(records)
    }

    async fn apply_delivery_interaction(
        &self,
        id: DbId,
        from: DeliveryStatus,
        to: DeliveryStatus,
        now: Timestamp,
    ) -> Result<bool, StoreError> {
        validate_delivery_transition(from, to)?;
        let mut state = self.op()?;
        match state.deliveries.get_mut(&id) {
            Some(d) if d.status == from => {
                d.status = to;
                d.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn prune_deliveries(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        let mut state = self.op()?;
        let State {
            notifications,
            deliveries,
            delivery_keys,
            ..
        } = &mut *state;
        let doomed: Vec<DbId> = deliveries
            .values()
            .filter(|d| d.created_at < cutoff)
            .filter(|d| {
                notifications
                    .get(&d.notification_id)
                    .is_some_and(|n| n.status != NotificationStatus::Pending)
            })
            .map(|d| d.id)
            .collect();
        for id in &doomed {
            if let Some(d) = deliveries.remove(id) {
                delivery_keys.remove(&(d.notification_id, d.user_id, d.channel));
            }
        }
        Ok(doomed.len() as u64)
    }

    async fn enqueue_job(&self, kind: JobKind, now: Timestamp) -> Result<BackgroundJob, StoreError> {
        let mut state = self.op()?;
        let id = state.next_id();
        let job = BackgroundJob {
            id,
            job_type: kind,
            status: JobStatus::Queued,
            attempts: 0,
            last_error: None,
            enqueued_at: now,
            claimed_at: None,
            completed_at: None,
        };
        state.jobs.insert(id, job.clone());
        Ok(job)
    }

    async fn claim_next_job(
        &self,
        now: Timestamp,
        stale_before: Timestamp,
    ) -> Result<Option<BackgroundJob>, StoreError> {
        let mut state = self.op()?;
        let next = state
            .jobs
            .values_mut()
            .filter(|j| match j.status {
                JobStatus::Queued => true,
                JobStatus::Running => j.claimed_at.is_some_and(|at| at < stale_before),
                _ => false,
            })
            .min_by_key(|j| (j.enqueued_at, j.id));
        Ok(next.map(|job| {
            job.status = JobStatus::Running;
            job.claimed_at = Some(now);
            job.clone()
        }))
    }

    async fn complete_job(&self, id: DbId, attempts: i32, now: Timestamp) -> Result<(), StoreError> {
        let mut state = self.op()?;
        if let Some(job) = state.jobs.get_mut(&id) {
            job.status = JobStatus::Completed;
            job.attempts = attempts;
            job.last_error = None;
            job.completed_at = Some(now);
        }
        Ok(())
    }

    async fn fail_job(
        &self,
        id: DbId,
        attempts: i32,
        error: &str,
        now: Timestamp,
    ) -> Result<(), StoreError> {
        let mut state = self.op()?;
        if let Some(job) = state.jobs.get_mut(&id) {
            job.status = JobStatus::Failed;
            job.attempts = attempts;
            job.last_error = Some(error.to_string());
            job.completed_at = Some(now);
        }
        Ok(())
    }

    async fn statistics(
        &self,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
    ) -> Result<NotificationStatistics, StoreError> {
        let state = self.op()?;
        let in_window = |n: &Notification| {
            from.map_or(true, |f| n.created_at >= f) && to.map_or(true, |t| n.created_at < t)
        };

        let mut stats = NotificationStatistics {
            from,
            to,
            ..Default::default()
        };
        for n in state.notifications.values().filter(|n| in_window(*n)) {
            stats.total += 1;
            *stats.by_status.entry(n.status).or_default() += 1;
            *stats.by_type.entry(n.notification_type).or_default() += 1;
        }
        for d in state.deliveries.values() {
            if state.notifications.get(&d.notification_id).is_some_and(|n| in_window(n)) {
                *stats
                    .deliveries
                    .entry(d.channel)
                    .or_default()
                    .entry(d.status)
                    .or_default() += 1;
            }
        }
        Ok(stats)
    }
}
