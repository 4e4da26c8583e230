//! Pure domain logic for the geo-targeted notification engine.
//!
//! This crate has zero internal dependencies so it can be shared by the
//! persistence layer, the channel senders, and the worker without cycles.
//! Nothing in here touches the database or the network.

#[macro_use]
mod macros;

pub mod clock;
pub mod criteria;
pub mod error;
pub mod geo;
pub mod jobs;
pub mod notification;
pub mod quiet_hours;
pub mod state_machine;
pub mod types;
