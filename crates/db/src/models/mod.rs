//! Row models and DTOs, one module per table family.

pub mod background_job;
pub mod delivery;
pub mod location;
pub mod notification;
pub mod preference;
pub mod recipient;
pub mod statistics;
