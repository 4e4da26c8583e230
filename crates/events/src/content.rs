//! Plain-text rendering of a notification for an outbound channel.

use geonotify_core::notification::DeliveryChannel;
use geonotify_db::models::notification::Notification;
use serde::Serialize;

/// SMS bodies longer than one segment are cut here.
const SMS_MAX_CHARS: usize = 160;

/// A notification rendered for one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelMessage {
    pub notification_id: i64,
    pub channel: DeliveryChannel,
    pub subject: String,
    pub body: String,
    /// Opaque producer payload (deep link, listing id, ...), forwarded as-is.
    pub data: serde_json::Value,
}

impl ChannelMessage {
    pub fn render(notification: &Notification, channel: DeliveryChannel) -> Self {
        let body = match channel {
            DeliveryChannel::Mail => mail_body(notification),
            DeliveryChannel::Sms => sms_body(notification),
            DeliveryChannel::Push | DeliveryChannel::Database => notification.message.clone(),
        };
        Self {
            notification_id: notification.id,
            channel,
            subject: notification.title.clone(),
            body,
            data: notification.data.clone(),
        }
    }
}

fn mail_body(notification: &Notification) -> String {
    let mut body = notification.message.clone();
    if let Some(place) = notification.location_name.as_deref() {
        body.push_str("\n\nLocation: ");
        body.push_str(place);
    }
    if let Some(link) = notification.data.get("url").and_then(|v| v.as_str()) {
        body.push_str("\nOpen: ");
        body.push_str(link);
    }
    body
}

fn sms_body(notification: &Notification) -> String {
    let full = format!("{}: {}", notification.title, notification.message);
    if full.chars().count() <= SMS_MAX_CHARS {
        return full;
    }
    let mut cut: String = full.chars().take(SMS_MAX_CHARS - 3).collect();
    cut.push_str("...");
    cut
}
