//! External delivery channels.
//!
//! Mail goes out over SMTP; push and SMS are posted as JSON to HTTP
//! gateways operated by the respective providers.

pub mod email;
pub mod gateway;
