//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument. Timestamps are bound from the
//! caller's clock rather than `NOW()` so passes stay deterministic.

pub mod background_job_repo;
pub mod delivery_record_repo;
pub mod location_profile_repo;
pub mod notification_preference_repo;
pub mod notification_repo;
pub mod recipient_repo;
pub mod statistics_repo;

pub use background_job_repo::BackgroundJobRepo;
pub use delivery_record_repo::DeliveryRecordRepo;
pub use location_profile_repo::LocationProfileRepo;
pub use notification_preference_repo::NotificationPreferenceRepo;
pub use notification_repo::NotificationRepo;
pub use recipient_repo::RecipientRepo;
pub use statistics_repo::StatisticsRepo;
