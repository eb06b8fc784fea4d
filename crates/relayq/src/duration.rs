//! `ctx.waitFor`'s duration shape.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// `{seconds?, minutes?, hours?, days?, weeks?, months?, years?}`. Months are
/// treated as 30 days and years as 365 days — this is a scheduling
/// primitive, not a calendar library.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WaitDuration {
    pub seconds: Option<i64>,
    pub minutes: Option<i64>,
    pub hours: Option<i64>,
    pub days: Option<i64>,
    pub weeks: Option<i64>,
    pub months: Option<i64>,
    pub years: Option<i64>,
}

impl WaitDuration {
    pub fn seconds(n: i64) -> Self {
        Self { seconds: Some(n), ..Default::default() }
    }

    pub fn minutes(n: i64) -> Self {
        Self { minutes: Some(n), ..Default::default() }
    }

    pub fn hours(n: i64) -> Self {
        Self { hours: Some(n), ..Default::default() }
    }

    pub fn days(n: i64) -> Self {
        Self { days: Some(n), ..Default::default() }
    }

    /// Total duration in milliseconds. The sum must be positive — a
    /// configuration error raised synchronously, never persisted.
    pub fn total_ms(&self) -> Result<i64, QueueError> {
        let total = self.seconds.unwrap_or(0) * 1_000
            + self.minutes.unwrap_or(0) * 60_000
            + self.hours.unwrap_or(0) * 3_600_000
            + self.days.unwrap_or(0) * 86_400_000
            + self.weeks.unwrap_or(0) * 7 * 86_400_000
            + self.months.unwrap_or(0) * 30 * 86_400_000
            + self.years.unwrap_or(0) * 365 * 86_400_000;
        if total <= 0 {
            return Err(QueueError::Config(
                "waitFor duration must sum to a positive value".to_string(),
            ));
        }
        Ok(total)
    }

    pub fn from_now(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, QueueError> {
        Ok(now + ChronoDuration::milliseconds(self.total_ms()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_hour_is_3_600_000_ms() {
        assert_eq!(WaitDuration::hours(1).total_ms().unwrap(), 3_600_000);
    }

    #[test]
    fn combined_fields_sum() {
        let d = WaitDuration { minutes: Some(1), seconds: Some(30), ..Default::default() };
        assert_eq!(d.total_ms().unwrap(), 90_000);
    }

    #[test]
    fn zero_total_is_a_config_error() {
        let err = WaitDuration::default().total_ms().unwrap_err();
        assert!(matches!(err, QueueError::Config(_)));
    }

    #[test]
    fn from_now_is_within_a_second_of_the_expected_instant() {
        let now = Utc::now();
        let until = WaitDuration::hours(1).from_now(now).unwrap();
        let expected = now + ChronoDuration::milliseconds(3_600_000);
        assert!((until - expected).num_milliseconds().abs() < 1_000);
    }
}
