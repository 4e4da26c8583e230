//! Outbound delivery channels for geo-targeted notifications.
//!
//! - [`ChannelSender`]: the seam the dispatcher sends through, one
//!   implementation per external channel.
//! - [`ChannelMessage`]: a notification rendered for one channel.
//! - [`delivery`]: SMTP mail and HTTP push/SMS gateway senders.
//! - [`ChannelSenders`]: the configured set, keyed by channel.
//!
//! Senders make exactly one attempt per call; retries happen at the pass
//! level, never inside a sender.

pub mod content;
pub mod delivery;
pub mod sender;

pub use content::ChannelMessage;
pub use delivery::email::{EmailConfig, EmailSender};
pub use delivery::gateway::{GatewayConfig, GatewaySender};
pub use sender::{ChannelSender, ChannelSenders, SendError};
