//! Push and SMS delivery through HTTP gateways.
//!
//! Each gateway accepts a JSON POST with a bearer token and answers 2xx on
//! acceptance. Any other status is a rejection; there are no in-sender
//! retries.

use std::time::Duration;

use async_trait::async_trait;
use geonotify_core::notification::DeliveryChannel;
use geonotify_db::models::recipient::Recipient;

use crate::content::ChannelMessage;
use crate::sender::{ChannelSender, SendError};

/// HTTP request timeout for a single attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// GatewayConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub channel: DeliveryChannel,
    pub url: String,
    pub token: Option<String>,
    /// Sender id shown to SMS recipients.
    pub sender_id: Option<String>,
}

impl GatewayConfig {
    /// | Variable             | Required |
    /// |----------------------|----------|
    /// | `PUSH_GATEWAY_URL`   | yes      |
    /// | `PUSH_GATEWAY_TOKEN` | no       |
    pub fn push_from_env() -> Option<Self> {
        Self::from_vars(DeliveryChannel::Push, |key| std::env::var(key).ok())
    }

    /// | Variable            | Required |
    /// |---------------------|----------|
    /// | `SMS_GATEWAY_URL`   | yes      |
    /// | `SMS_GATEWAY_TOKEN` | no       |
    /// | `SMS_SENDER_ID`     | no       |
    pub fn sms_from_env() -> Option<Self> {
        Self::from_vars(DeliveryChannel::Sms, |key| std::env::var(key).ok())
    }

    pub fn from_vars(
        channel: DeliveryChannel,
        var: impl Fn(&str) -> Option<String>,
    ) -> Option<Self> {
        let prefix = match channel {
            DeliveryChannel::Push => "PUSH",
            DeliveryChannel::Sms => "SMS",
            DeliveryChannel::Mail | DeliveryChannel::Database => return None,
        };
        let url = var(&format!("{prefix}_GATEWAY_URL")).filter(|u| !u.is_empty())?;
        Some(Self {
            channel,
            url,
            token: var(&format!("{prefix}_GATEWAY_TOKEN")),
            sender_id: match channel {
                DeliveryChannel::Sms => var("SMS_SENDER_ID"),
                _ => None,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// GatewaySender
// ---------------------------------------------------------------------------

pub struct GatewaySender {
    config: GatewayConfig,
    client: reqwest::Client,
}

impl GatewaySender {
    pub fn new(config: GatewayConfig) -> Result<Self, SendError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { config, client })
    }

    /// The JSON body posted to the gateway, or `None` when the recipient
    /// has no address on this channel.
    fn payload(&self, recipient: &Recipient, message: &ChannelMessage) -> Option<serde_json::Value> {
        match self.config.channel {
            DeliveryChannel::Push => recipient.push_token.as_deref().map(|token| {
                serde_json::json!({
                    "to": token,
                    "title": message.subject,
                    "body": message.body,
                    "data": message.data,
                    "notification_id": message.notification_id,
                })
            }),
            DeliveryChannel::Sms => recipient.phone.as_deref().map(|phone| {
                serde_json::json!({
                    "to": phone,
                    "from": self.config.sender_id,
                    "text": message.body,
                })
            }),
            DeliveryChannel::Mail | DeliveryChannel::Database => None,
        }
    }
}

#[async_trait]
impl ChannelSender for GatewaySender {
    fn channel(&self) -> DeliveryChannel {
        self.config.channel
    }

    async fn send(&self, recipient: &Recipient, message: &ChannelMessage) -> Result<(), SendError> {
        let payload = self
            .payload(recipient, message)
            .ok_or(SendError::MissingRecipient(self.config.channel))?;

        let mut request = self.client.post(&self.config.url).json(&payload);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(SendError::Rejected {
                status: response.status().as_u16(),
            });
        }

        tracing::debug!(
            channel = %self.config.channel,
            user_id = recipient.id,
            notification_id = message.notification_id,
            "Gateway accepted notification"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn recipient(phone: Option<&str>, push_token: Option<&str>) -> Recipient {
        Recipient {
            id: 3,
            email: None,
            phone: phone.map(str::to_string),
            push_token: push_token.map(str::to_string),
            attributes: serde_json::json!({}),
            is_active: true,
        }
    }

    fn message() -> ChannelMessage {
        ChannelMessage {
            notification_id: 11,
            channel: DeliveryChannel::Sms,
            subject: "Pickup".into(),
            body: "Pickup: your van is ready".into(),
            data: serde_json::json!({}),
        }
    }

    fn sender(channel: DeliveryChannel) -> GatewaySender {
        let config = GatewayConfig::from_vars(channel, |key| match key {
            "PUSH_GATEWAY_URL" | "SMS_GATEWAY_URL" => Some("http://127.0.0.1:9/send".into()),
            "SMS_SENDER_ID" => Some("GeoAlerts".into()),
            _ => None,
        })
        .unwrap();
        GatewaySender::new(config).unwrap()
    }

    #[test]
    fn only_push_and_sms_have_gateways() {
        let any = |_: &str| Some("http://gw".to_string());
        assert!(GatewayConfig::from_vars(DeliveryChannel::Mail, any).is_none());
        assert!(GatewayConfig::from_vars(DeliveryChannel::Sms, |_| None).is_none());
    }

    #[test]
    fn sms_payload_uses_phone_and_sender_id() {
        let payload = sender(DeliveryChannel::Sms)
            .payload(&recipient(Some("+33600000000"), None), &message())
            .unwrap();
        assert_eq!(payload["to"], "+33600000000");
        assert_eq!(payload["from"], "GeoAlerts");
        assert_eq!(payload["text"], "Pickup: your van is ready");
    }

    #[test]
    fn push_payload_requires_token() {
        let push = sender(DeliveryChannel::Push);
        assert!(push.payload(&recipient(Some("+33600000000"), None), &message()).is_none());
        let payload = push.payload(&recipient(None, Some("tok-1")), &message()).unwrap();
        assert_eq!(payload["to"], "tok-1");
        assert_eq!(payload["notification_id"], 11);
    }

    #[tokio::test]
    async fn missing_address_fails_without_network() {
        let result = sender(DeliveryChannel::Push)
            .send(&recipient(None, None), &message())
            .await;
        assert_matches!(result, Err(SendError::MissingRecipient(DeliveryChannel::Push)));
    }
}
