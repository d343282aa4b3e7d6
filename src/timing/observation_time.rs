//! Decides which point-observation snapshot counts as "latest" for a given
//! wall-clock time.
//!
//! Observation sets start publishing shortly after each hour boundary and fill
//! in over the following half hour. Before the grace window has elapsed the
//! resolver pins the request to the top of the current hour; after it, reports
//! are considered live and "now" is used directly.
//!
//! All functions take `now` explicitly so the rule is deterministic in tests.

use chrono::{DateTime, Timelike, Utc};

/// Default grace window after the hour before a snapshot is trusted.
pub const DEFAULT_GRACE_MINUTES: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservationTimeResolver {
    grace_minutes: u32,
}

impl Default for ObservationTimeResolver {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_MINUTES)
    }
}

impl ObservationTimeResolver {
    pub fn new(grace_minutes: u32) -> Self {
        Self {
            grace_minutes: grace_minutes.min(59),
        }
    }

    pub fn grace_minutes(&self) -> u32 {
        self.grace_minutes
    }

    /// ```
    /// use chrono::{TimeZone, Utc};
    /// use firewx::ObservationTimeResolver;
    ///
    /// let resolver = ObservationTimeResolver::default();
    /// let early = Utc.with_ymd_and_hms(2024, 6, 1, 18, 10, 0).unwrap();
    /// let late = Utc.with_ymd_and_hms(2024, 6, 1, 18, 45, 0).unwrap();
    /// assert_eq!(resolver.resolve(early), Utc.with_ymd_and_hms(2024, 6, 1, 18, 0, 0).unwrap());
    /// assert_eq!(resolver.resolve(late), late);
    /// ```
    pub fn resolve(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        if now.minute() < self.grace_minutes {
            truncate_to_hour(now)
        } else {
            now
        }
    }
}

/// Start of the hour containing `instant`.
pub fn truncate_to_hour(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(instant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_before_grace_uses_current_hour() {
        let resolver = ObservationTimeResolver::default();
        assert_eq!(resolver.resolve(at(18, 10)), at(18, 0));
        assert_eq!(resolver.resolve(at(18, 0)), at(18, 0));
        assert_eq!(resolver.resolve(at(18, 29)), at(18, 0));
    }

    #[test]
    fn test_after_grace_uses_now() {
        let resolver = ObservationTimeResolver::default();
        assert_eq!(resolver.resolve(at(18, 45)), at(18, 45));
        assert_eq!(resolver.resolve(at(18, 30)), at(18, 30));
    }

    #[test]
    fn test_custom_grace() {
        let resolver = ObservationTimeResolver::new(15);
        assert_eq!(resolver.resolve(at(7, 14)), at(7, 0));
        assert_eq!(resolver.resolve(at(7, 20)), at(7, 20));
        assert_eq!(ObservationTimeResolver::new(90).grace_minutes(), 59);
    }

    #[test]
    fn test_truncate_to_hour_drops_seconds() {
        let instant = Utc.with_ymd_and_hms(2024, 6, 1, 18, 10, 42).unwrap();
        assert_eq!(truncate_to_hour(instant), at(18, 0));
    }

    #[test]
    fn test_truncate_clears_seconds_and_nanos() {
        let messy = at(18, 47) + chrono::Duration::seconds(13) + chrono::Duration::nanoseconds(250);
        assert_eq!(truncate_to_hour(messy), at(18, 0));
        assert_eq!(
            ObservationTimeResolver::default().resolve(messy - chrono::Duration::minutes(40)),
            at(18, 0)
        );
    }
}
