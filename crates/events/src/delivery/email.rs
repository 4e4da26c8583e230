//! Notification delivery via SMTP.
//!
//! [`EmailSender`] wraps a pooled `lettre` async SMTP transport. If
//! `SMTP_HOST` is not set, [`EmailConfig::from_env`] returns `None` and the
//! mail channel stays unconfigured.

use async_trait::async_trait;
use geonotify_core::notification::DeliveryChannel;
use geonotify_db::models::recipient::Recipient;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::content::ChannelMessage;
use crate::sender::{ChannelSender, SendError};

// ---------------------------------------------------------------------------
// EmailConfig
// ---------------------------------------------------------------------------

/// Default SMTP port (STARTTLS).
const DEFAULT_SMTP_PORT: u16 = 587;

/// Default sender address when `SMTP_FROM` is not set.
const DEFAULT_FROM_ADDRESS: &str = "noreply@geonotify.local";

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    /// RFC 5322 "From" address.
    pub from_address: String,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
}

impl EmailConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable        | Required | Default                    |
    /// |-----------------|----------|----------------------------|
    /// | `SMTP_HOST`     | yes      |                            |
    /// | `SMTP_PORT`     | no       | `587`                      |
    /// | `SMTP_FROM`     | no       | `noreply@geonotify.local`  |
    /// | `SMTP_USER`     | no       |                            |
    /// | `SMTP_PASSWORD` | no       |                            |
    pub fn from_env() -> Option<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary lookup.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let smtp_host = var("SMTP_HOST").filter(|h| !h.is_empty())?;
        Some(Self {
            smtp_host,
            smtp_port: var("SMTP_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_SMTP_PORT),
            from_address: var("SMTP_FROM").unwrap_or_else(|| DEFAULT_FROM_ADDRESS.to_string()),
            smtp_user: var("SMTP_USER"),
            smtp_password: var("SMTP_PASSWORD"),
        })
    }
}

// ---------------------------------------------------------------------------
// EmailSender
// ---------------------------------------------------------------------------

pub struct EmailSender {
    from: Mailbox,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailSender {
    /// Build the transport once; connections are pooled across sends.
    pub fn new(config: EmailConfig) -> Result<Self, SendError> {
        let from: Mailbox = config.from_address.parse()?;

        let mut transport_builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
                .port(config.smtp_port);

        if let (Some(user), Some(pass)) = (config.smtp_user, config.smtp_password) {
            transport_builder = transport_builder.credentials(Credentials::new(user, pass));
        }

        Ok(Self {
            from,
            mailer: transport_builder.build(),
        })
    }
}

#[async_trait]
impl ChannelSender for EmailSender {
    fn channel(&self) -> DeliveryChannel {
        DeliveryChannel::Mail
    }

    async fn send(&self, recipient: &Recipient, message: &ChannelMessage) -> Result<(), SendError> {
        let to_email = recipient
            .email
            .as_deref()
            .ok_or(SendError::MissingRecipient(DeliveryChannel::Mail))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to_email.parse()?)
            .subject(message.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|e| SendError::Build(e.to_string()))?;

        self.mailer.send(email).await?;

        tracing::debug!(
            user_id = recipient.id,
            notification_id = message.notification_id,
            "Notification email sent"
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
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_host_means_unconfigured() {
        assert!(EmailConfig::from_vars(lookup(&[("SMTP_PORT", "25")])).is_none());
        assert!(EmailConfig::from_vars(lookup(&[("SMTP_HOST", "")])).is_none());
    }

    #[test]
    fn defaults_apply() {
        let config = EmailConfig::from_vars(lookup(&[
            ("SMTP_HOST", "smtp.example.com"),
            ("SMTP_PORT", "not-a-port"),
        ]))
        .unwrap();
        assert_eq!(config.smtp_port, 587);
        assert_eq!(config.from_address, "noreply@geonotify.local");
        assert!(config.smtp_user.is_none());
    }

    #[test]
    fn bad_from_address_is_rejected() {
        let config = EmailConfig::from_vars(lookup(&[
            ("SMTP_HOST", "smtp.example.com"),
            ("SMTP_FROM", "not-an-email"),
        ]))
        .unwrap();
        assert_matches!(EmailSender::new(config).err(), Some(SendError::Address(_)));
    }
}
