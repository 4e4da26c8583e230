//! The channel sender seam and its error type.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use geonotify_core::notification::DeliveryChannel;
use geonotify_db::models::recipient::Recipient;

use crate::content::ChannelMessage;
use crate::delivery::email::{EmailConfig, EmailSender};
use crate::delivery::gateway::{GatewayConfig, GatewaySender};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Why a single channel attempt failed. Recorded as the delivery's
/// failure reason.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// SMTP transport-level failure (authentication, connection, etc.).
    #[error("SMTP transport error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    /// The gateway request failed (network, DNS, TLS).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with a non-2xx status.
    #[error("provider rejected the message with HTTP {status}")]
    Rejected { status: u16 },

    /// The recipient or sender address could not be parsed.
    #[error("email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// The outbound message could not be assembled.
    #[error("message build error: {0}")]
    Build(String),

    /// The recipient has no address for this channel.
    #[error("recipient has no {0} address")]
    MissingRecipient(DeliveryChannel),

    /// The attempt exceeded its time budget.
    #[error("send timed out after {0:?}")]
    Timeout(Duration),
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// One external delivery channel (mail, push, SMS).
#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn channel(&self) -> DeliveryChannel;

    /// Make a single delivery attempt.
    async fn send(&self, recipient: &Recipient, message: &ChannelMessage) -> Result<(), SendError>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// The configured external senders. A channel without a sender is
/// "not configured" and its deliveries are recorded as failed.
#[derive(Clone, Default)]
pub struct ChannelSenders {
    senders: HashMap<DeliveryChannel, Arc<dyn ChannelSender>>,
}

impl ChannelSenders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sender, replacing any previous one for its channel.
    pub fn with(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.senders.insert(sender.channel(), sender);
        self
    }

    pub fn get(&self, channel: DeliveryChannel) -> Option<&Arc<dyn ChannelSender>> {
        self.senders.get(&channel)
    }

    pub fn configured(&self) -> Vec<DeliveryChannel> {
        let mut channels: Vec<_> = self.senders.keys().copied().collect();
        channels.sort();
        channels
    }

    /// Build every sender whose environment is present.
    ///
    /// A sender that fails to build is logged and left unconfigured.
    pub fn from_env() -> Self {
        let mut senders = Self::new();

        if let Some(config) = EmailConfig::from_env() {
            match EmailSender::new(config) {
                Ok(sender) => senders = senders.with(Arc::new(sender)),
                Err(e) => tracing::error!(error = %e, "Failed to build SMTP sender"),
            }
        }

        for config in [GatewayConfig::push_from_env(), GatewayConfig::sms_from_env()]
            .into_iter()
            .flatten()
        {
            let channel = config.channel;
            match GatewaySender::new(config) {
                Ok(sender) => senders = senders.with(Arc::new(sender)),
                Err(e) => tracing::error!(%channel, error = %e, "Failed to build gateway sender"),
            }
        }

        tracing::info!(channels = ?senders.configured(), "Channel senders configured");
        senders
    }
}

impl std::fmt::Debug for ChannelSenders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSenders")
            .field("channels", &self.configured())
            .finish()
    }
}
