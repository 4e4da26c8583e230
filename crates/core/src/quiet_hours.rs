//! Quiet-hours windows and local-time helpers.

use chrono::{NaiveTime, TimeZone};
use chrono_tz::Tz;

use crate::error::CoreError;
use crate::types::Timestamp;

/// A daily `[start, end)` window in the user's local time.
///
/// When `start > end` the window crosses midnight (e.g. 22:00 -> 07:00).
/// An empty window (`start == end`) never matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietHours {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, local: NaiveTime) -> bool {
        if self.start <= self.end {
            local >= self.start && local < self.end
        } else {
            local >= self.start || local < self.end
        }
    }

    /// Whether the UTC instant `now` falls inside the window in `zone`.
    pub fn is_active(&self, now: Timestamp, zone: Tz) -> bool {
        self.contains(now.with_timezone(&zone).time())
    }
}

/// Parse an IANA zone name, e.g. `Europe/Paris`.
pub fn parse_zone(name: &str) -> Result<Tz, CoreError> {
    name.parse::<Tz>()
        .map_err(|_| CoreError::Validation(format!("unknown time zone '{name}'")))
}

/// Resolve an optional per-user zone, falling back to `default`.
///
/// An unparseable stored value also falls back rather than blocking delivery.
pub fn resolve_zone(name: Option<&str>, default: Tz) -> Tz {
    name.and_then(|n| parse_zone(n).ok()).unwrap_or(default)
}

/// UTC instant of the most recent local midnight at or before `now`.
pub fn start_of_local_day(now: Timestamp, zone: Tz) -> Timestamp {
    let local_date = now.with_timezone(&zone).date_naive();
    let midnight = local_date.and_time(NaiveTime::default());
    // DST gaps can skip midnight; take the earliest valid local instant.
    zone.from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|| {
            let shifted = midnight + chrono::Duration::hours(1);
            zone.from_local_datetime(&shifted)
                .earliest()
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .unwrap_or(now)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn overnight_window() {
        let q = QuietHours::new(t(22, 0), t(7, 0));
        assert!(q.contains(t(23, 0)));
        assert!(q.contains(t(22, 0)));
        assert!(q.contains(t(3, 30)));
        assert!(!q.contains(t(7, 0)));
        assert!(!q.contains(t(8, 0)));
        assert!(!q.contains(t(21, 59)));
    }

    #[test]
    fn same_day_window() {
        let q = QuietHours::new(t(12, 0), t(14, 0));
        assert!(q.contains(t(12, 0)));
        assert!(q.contains(t(13, 59)));
        assert!(!q.contains(t(14, 0)));
        assert!(!q.contains(t(11, 0)));
    }

    #[test]
    fn empty_window_never_matches() {
        let q = QuietHours::new(t(9, 0), t(9, 0));
        assert!(!q.contains(t(9, 0)));
        assert!(!q.contains(t(21, 0)));
    }

    #[test]
    fn evaluated_in_user_zone() {
        let q = QuietHours::new(t(22, 0), t(7, 0));
        // 21:30 UTC is 23:30 in Paris (CEST, UTC+2).
        let now = Utc.with_ymd_and_hms(2026, 6, 10, 21, 30, 0).unwrap();
        assert!(q.is_active(now, chrono_tz::Europe::Paris));
        assert!(!q.is_active(now, chrono_tz::UTC));
    }

    #[test]
    fn zone_resolution_falls_back() {
        assert_eq!(resolve_zone(Some("Asia/Tokyo"), Tz::UTC), chrono_tz::Asia::Tokyo);
        assert_eq!(resolve_zone(Some("Mars/Olympus"), Tz::UTC), Tz::UTC);
        assert_eq!(resolve_zone(None, chrono_tz::Europe::Paris), chrono_tz::Europe::Paris);
        assert!(parse_zone("Not/AZone").is_err());
    }

    #[test]
    fn local_midnight_in_utc() {
        // 01:00 UTC on June 10 is 03:00 in Paris; local midnight was 22:00 UTC June 9.
        let now = Utc.with_ymd_and_hms(2026, 6, 10, 1, 0, 0).unwrap();
        let start = start_of_local_day(now, chrono_tz::Europe::Paris);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 6, 9, 22, 0, 0).unwrap());

        let start_utc = start_of_local_day(now, Tz::UTC);
        assert_eq!(start_utc, Utc.with_ymd_and_hms(2026, 6, 10, 0, 0, 0).unwrap());
    }
}
