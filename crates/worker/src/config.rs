//! Worker configuration loaded from environment variables.

use std::time::Duration;

use chrono_tz::Tz;
use geonotify_core::quiet_hours::parse_zone;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} has an invalid value '{value}'")]
    Invalid { var: &'static str, value: String },
}

/// Engine tunables. All fields except the database URL have defaults
/// suitable for local development.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub process_interval: Duration,
    pub cleanup_interval: Duration,
    pub queue_poll_interval: Duration,
    /// Notifications dispatched concurrently within one process pass.
    pub dispatch_concurrency: usize,
    /// Recipients processed concurrently within one notification.
    pub fanout_concurrency: usize,
    pub channel_timeout: Duration,
    pub claim_lease: chrono::Duration,
    /// A queued job claimed longer ago than this is considered abandoned and
    /// handed to the next consumer. Must exceed the longest job budget.
    pub job_claim_timeout: chrono::Duration,
    /// Passes with nothing delivered before an all-failed notification is failed.
    pub dispatch_max_attempts: i32,
    pub notification_retention: chrono::Duration,
    /// `None` disables delivery record pruning.
    pub delivery_retention: Option<chrono::Duration>,
    /// `None` disables stale location pruning.
    pub location_retention: Option<chrono::Duration>,
    pub default_timezone: Tz,
    pub due_batch_size: i64,
    /// Delay before each job retry; the last entry repeats.
    pub job_backoff: Vec<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            database_max_connections: geonotify_db::DEFAULT_MAX_CONNECTIONS,
            process_interval: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(3600),
            queue_poll_interval: Duration::from_secs(1),
            dispatch_concurrency: 8,
            fanout_concurrency: 16,
            channel_timeout: Duration::from_secs(10),
            claim_lease: chrono::Duration::seconds(300),
            job_claim_timeout: chrono::Duration::seconds(900),
            dispatch_max_attempts: 3,
            notification_retention: chrono::Duration::days(30),
            delivery_retention: Some(chrono::Duration::days(90)),
            location_retention: None,
            default_timezone: Tz::UTC,
            due_batch_size: 500,
            job_backoff: crate::jobs::retry::DEFAULT_BACKOFF.to_vec(),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default    |
    /// |-------------------------------|------------|
    /// | `DATABASE_URL`                | required   |
    /// | `DATABASE_MAX_CONNECTIONS`    | `20`       |
    /// | `PROCESS_INTERVAL_SECS`       | `60`       |
    /// | `CLEANUP_INTERVAL_SECS`       | `3600`     |
    /// | `QUEUE_POLL_INTERVAL_SECS`    | `1`        |
    /// | `DISPATCH_CONCURRENCY`        | `8`        |
    /// | `FANOUT_CONCURRENCY`          | `16`       |
    /// | `CHANNEL_TIMEOUT_SECS`        | `10`       |
    /// | `CLAIM_LEASE_SECS`            | `300`      |
    /// | `JOB_CLAIM_TIMEOUT_SECS`      | `900`      |
    /// | `DISPATCH_MAX_ATTEMPTS`       | `3`        |
    /// | `NOTIFICATION_RETENTION_DAYS` | `30`       |
    /// | `DELIVERY_RETENTION_DAYS`     | `90` (0 disables) |
    /// | `LOCATION_RETENTION_DAYS`     | `0` (disabled)    |
    /// | `DEFAULT_TIMEZONE`            | `UTC`      |
    /// | `DUE_BATCH_SIZE`              | `500`      |
    /// | `JOB_BACKOFF_SECS`            | `1,2,4`    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary lookup.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let database_url = var("DATABASE_URL")
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let secs = |name: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            parse_or(&var, name, default.as_secs()).map(Duration::from_secs)
        };
        let days = |name: &'static str, default: i64| -> Result<Option<chrono::Duration>, ConfigError> {
            let n: i64 = parse_or(&var, name, default)?;
            Ok((n > 0).then(|| chrono::Duration::days(n)))
        };

        let notification_retention = days("NOTIFICATION_RETENTION_DAYS", 30)?.ok_or_else(|| {
            ConfigError::Invalid {
                var: "NOTIFICATION_RETENTION_DAYS",
                value: var("NOTIFICATION_RETENTION_DAYS").unwrap_or_default(),
            }
        })?;

        let default_timezone = match var("DEFAULT_TIMEZONE") {
            Some(name) => parse_zone(&name).map_err(|_| ConfigError::Invalid {
                var: "DEFAULT_TIMEZONE",
                value: name,
            })?,
            None => defaults.default_timezone,
        };

        let job_backoff = match var("JOB_BACKOFF_SECS") {
            Some(raw) => parse_backoff(&raw).ok_or(ConfigError::Invalid {
                var: "JOB_BACKOFF_SECS",
                value: raw,
            })?,
            None => defaults.job_backoff,
        };

        Ok(Self {
            database_url,
            database_max_connections: parse_or(
                &var,
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            process_interval: secs("PROCESS_INTERVAL_SECS", defaults.process_interval)?,
            cleanup_interval: secs("CLEANUP_INTERVAL_SECS", defaults.cleanup_interval)?,
            queue_poll_interval: secs("QUEUE_POLL_INTERVAL_SECS", defaults.queue_poll_interval)?,
            dispatch_concurrency: parse_or(&var, "DISPATCH_CONCURRENCY", defaults.dispatch_concurrency)?
                .max(1),
            fanout_concurrency: parse_or(&var, "FANOUT_CONCURRENCY", defaults.fanout_concurrency)?
                .max(1),
            channel_timeout: secs("CHANNEL_TIMEOUT_SECS", defaults.channel_timeout)?,
            claim_lease: chrono::Duration::seconds(parse_or(&var, "CLAIM_LEASE_SECS", 300_i64)?),
            job_claim_timeout: chrono::Duration::seconds(
                parse_or(&var, "JOB_CLAIM_TIMEOUT_SECS", 900_i64)?.max(1),
            ),
            dispatch_max_attempts: parse_or(
                &var,
                "DISPATCH_MAX_ATTEMPTS",
                defaults.dispatch_max_attempts,
            )?
            .max(1),
            notification_retention,
            delivery_retention: days("DELIVERY_RETENTION_DAYS", 90)?,
            location_retention: days("LOCATION_RETENTION_DAYS", 0)?,
            default_timezone,
            due_batch_size: parse_or(&var, "DUE_BATCH_SIZE", defaults.due_batch_size)?.max(1),
            job_backoff,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            var: name,
            value: raw,
        }),
    }
}

/// `"1,2,4"` into second delays. Empty input means no delay.
fn parse_backoff(raw: &str) -> Option<Vec<Duration>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse().ok().map(Duration::from_secs))
        .collect()
}
