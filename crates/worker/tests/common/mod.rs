//! Shared harness: in-memory store, pinned clock and scripted channel senders.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use geonotify_core::clock::{Clock, FixedClock};
use geonotify_core::notification::{DeliveryChannel, NotificationType};
use geonotify_core::types::{DbId, Timestamp};
use geonotify_db::models::delivery::DeliveryRecord;
use geonotify_db::models::notification::{CreateNotification, Notification};
use geonotify_db::models::preference::NotificationPreferences;
use geonotify_db::models::recipient::Recipient;
use geonotify_events::{ChannelMessage, ChannelSender, ChannelSenders, SendError};
use geonotify_worker::store::NotificationStore;
use geonotify_worker::{Engine, MemoryStore, WorkerConfig};
use serde_json::json;
use tokio_util::sync::CancellationToken;

pub const PARIS: (f64, f64) = (48.8566, 2.3522);
/// About 1.1 km from [`PARIS`].
pub const LOUVRE: (f64, f64) = (48.8606, 2.3376);
/// About 47 km from [`PARIS`].
pub const MEAUX_AREA: (f64, f64) = (48.9, 2.9);
pub const LYON: (f64, f64) = (45.764, 4.8357);

/// Monday 2026-03-02 12:00 UTC.
pub fn start() -> Timestamp {
    Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
}

pub fn at(day: u32, hour: u32, minute: u32) -> Timestamp {
    Utc.with_ymd_and_hms(2026, 3, day, hour, minute, 0).unwrap()
}

// ---------------------------------------------------------------------------
// Scripted sender
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Succeed,
    Fail,
    /// Never answers; the dispatcher's timeout cuts it off.
    Hang,
    /// Succeeds after a short pause, letting other tasks interleave.
    Slow(Duration),
}

pub struct ScriptedSender {
    channel: DeliveryChannel,
    behavior: Behavior,
    sent: Mutex<Vec<(DbId, DbId)>>,
    deactivate_on_send: Mutex<Option<(Arc<MemoryStore>, DbId)>>,
    fail_store_on_send: Mutex<Option<(Arc<MemoryStore>, DbId)>>,
    cancel_on_send: Mutex<Option<CancellationToken>>,
}

impl ScriptedSender {
    pub fn new(channel: DeliveryChannel, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            channel,
            behavior,
            sent: Mutex::new(Vec::new()),
            deactivate_on_send: Mutex::new(None),
            fail_store_on_send: Mutex::new(None),
            cancel_on_send: Mutex::new(None),
        })
    }

    /// `(notification_id, user_id)` for every call.
    pub fn calls(&self) -> Vec<(DbId, DbId)> {
        self.sent.lock().unwrap().clone()
    }

    /// Deactivate `notification_id` the first time this sender is called.
    pub fn deactivate_on_send(&self, store: Arc<MemoryStore>, notification_id: DbId) {
        *self.deactivate_on_send.lock().unwrap() = Some((store, notification_id));
    }

    /// Cancel `token` the first time this sender is called.
    pub fn cancel_on_send(&self, token: CancellationToken) {
        *self.cancel_on_send.lock().unwrap() = Some(token);
    }

    /// The first time this sender is called for `user_id`, make the next
    /// store operation fail. That is the write settling the send.
    pub fn fail_store_on_send(&self, store: Arc<MemoryStore>, user_id: DbId) {
        *self.fail_store_on_send.lock().unwrap() = Some((store, user_id));
    }
}

#[async_trait]
impl ChannelSender for ScriptedSender {
    fn channel(&self) -> DeliveryChannel {
        self.channel
    }

    async fn send(&self, recipient: &Recipient, message: &ChannelMessage) -> Result<(), SendError> {
        self.sent
            .lock()
            .unwrap()
            .push((message.notification_id, recipient.id));

        let hook = self.deactivate_on_send.lock().unwrap().take();
        if let Some((store, id)) = hook {
            store.deactivate(id, Utc::now()).await.unwrap();
        }

        let cancel_hook = self.cancel_on_send.lock().unwrap().take();
        if let Some(token) = cancel_hook {
            token.cancel();
        }

        let fail_hook = {
            let mut slot = self.fail_store_on_send.lock().unwrap();
            match slot.as_ref() {
                Some((_, user_id)) if *user_id == recipient.id => slot.take(),
                _ => None,
            }
        };
        if let Some((store, _)) = fail_hook {
            store.fail_next(1);
        }

        match self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail => Err(SendError::Rejected { status: 503 }),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
            Behavior::Slow(pause) => {
                tokio::time::sleep(pause).await;
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<FixedClock>,
    pub engine: Engine,
}

pub fn test_config() -> WorkerConfig {
    WorkerConfig {
        database_url: "memory://".into(),
        fanout_concurrency: 1,
        dispatch_concurrency: 4,
        channel_timeout: Duration::from_millis(100),
        job_backoff: Vec::new(),
        ..WorkerConfig::default()
    }
}

pub fn senders(list: &[Arc<ScriptedSender>]) -> ChannelSenders {
    list.iter().fold(ChannelSenders::new(), |acc, sender| {
        acc.with(Arc::clone(sender) as Arc<dyn ChannelSender>)
    })
}

impl Harness {
    /// Mail, push and SMS all succeed.
    pub fn new() -> Self {
        Self::with_senders(&[
            ScriptedSender::new(DeliveryChannel::Mail, Behavior::Succeed),
            ScriptedSender::new(DeliveryChannel::Push, Behavior::Succeed),
            ScriptedSender::new(DeliveryChannel::Sms, Behavior::Succeed),
        ])
    }

    pub fn with_senders(list: &[Arc<ScriptedSender>]) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(start()));
        let engine = Engine::new(
            test_config(),
            Arc::clone(&store) as Arc<dyn NotificationStore>,
            senders(list),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        Self {
            store,
            clock,
            engine,
        }
    }

    /// An active user with every contact detail, sharing `position` if given.
    pub fn add_user(&self, id: DbId, position: Option<(f64, f64)>) {
        self.add_user_with(id, position, json!({}));
    }

    pub fn add_user_with(&self, id: DbId, position: Option<(f64, f64)>, attributes: serde_json::Value) {
        self.store.insert_user(Recipient {
            id,
            email: Some(format!("user{id}@example.com")),
            phone: Some(format!("+3360000{id:04}")),
            push_token: Some(format!("push-{id}")),
            attributes,
            is_active: true,
        });
        if position.is_some() {
            self.store.set_location(id, position, true, self.clock.now());
        }
    }

    /// Store preferences built from the defaults.
    pub fn set_prefs(&self, user_id: DbId, edit: impl FnOnce(&mut NotificationPreferences)) {
        let mut prefs = NotificationPreferences::defaults_for(user_id, self.clock.now());
        edit(&mut prefs);
        self.store.set_preferences(prefs);
    }

    pub async fn notify(&self, input: CreateNotification) -> Notification {
        self.store
            .create_notification(&input, self.clock.now())
            .await
            .unwrap()
    }

    pub fn status(&self, id: DbId) -> geonotify_core::notification::NotificationStatus {
        self.store.notification(id).unwrap().status
    }

    pub fn deliveries_for(&self, notification_id: DbId) -> Vec<DeliveryRecord> {
        let mut records: Vec<_> = self
            .store
            .deliveries()
            .into_iter()
            .filter(|d| d.notification_id == notification_id)
            .collect();
        records.sort_by_key(|d| (d.user_id, d.channel));
        records
    }
}

/// A new-listing notification around `origin`.
pub fn notification_at(origin: (f64, f64), radius: i32) -> CreateNotification {
    CreateNotification {
        notification_type: NotificationType::NewListing,
        title: "New listing".into(),
        message: "A cargo bike was listed near you".into(),
        latitude: origin.0,
        longitude: origin.1,
        radius,
        location_name: Some("Paris".into()),
        target_criteria: json!({}),
        data: json!({}),
        is_active: None,
        expires_at: None,
        scheduled_for: None,
    }
}

pub fn paris_notification() -> CreateNotification {
    notification_at(PARIS, 5000)
}
