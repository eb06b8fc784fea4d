//! # relayq-cron
//!
//! Timezone-aware next-occurrence computation for the 5-field cron
//! expressions used by [`CronSchedule`](https://docs.rs/relayq) templates.
//!
//! ## Why not hand-roll a parser
//!
//! Field parsing (`*`, `,`, `-`, `/`) and day-of-week edge cases are exactly
//! what the `cron` crate already gets right; we only add the pieces it
//! doesn't cover: accepting the conventional 5-field POSIX form (minute hour
//! day-of-month month day-of-week) by prepending a synthetic `0` seconds
//! field, and evaluating occurrences in a named IANA timezone via
//! `chrono-tz` before converting back to UTC.
//!
//! ## DST handling
//!
//! `cron::Schedule::after` walks candidate local wall-clock times in the
//! schedule's timezone and lets `chrono-tz` reject or fold times that don't
//! exist (spring-forward gaps) or are ambiguous (fall-back overlaps); we
//! never compute in UTC and shift afterward, which is what would produce
//! wrong answers across a DST boundary.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use thiserror::Error;

/// Errors raised while parsing or evaluating a cron expression.
#[derive(Debug, Error)]
pub enum CronError {
    #[error("invalid cron expression `{expr}`: {reason}")]
    InvalidExpression { expr: String, reason: String },

    #[error("unknown timezone `{0}`")]
    UnknownTimezone(String),

    #[error("cron expression `{0}` has no future occurrence")]
    NoOccurrence(String),
}

/// Convert a 5-field POSIX cron expression (`minute hour day-of-month month
/// day-of-week`) into the 6-field form the `cron` crate expects by
/// prepending a `0` seconds field.
fn to_six_field(expr: &str) -> Result<String, CronError> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(CronError::InvalidExpression {
            expr: expr.to_string(),
            reason: format!("expected 5 fields, got {}", fields.len()),
        });
    }
    Ok(format!("0 {}", fields.join(" ")))
}

/// Parse `tz` as an IANA timezone name (`"UTC"`, `"America/New_York"`, ...).
fn parse_timezone(tz: &str) -> Result<Tz, CronError> {
    tz.parse::<Tz>()
        .map_err(|_| CronError::UnknownTimezone(tz.to_string()))
}

/// Parse a 5-field cron expression into a [`Schedule`], or return a
/// descriptive [`CronError`].
fn parse_schedule(expr: &str) -> Result<Schedule, CronError> {
    let six = to_six_field(expr)?;
    Schedule::from_str(&six).map_err(|e| CronError::InvalidExpression {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

/// Returns `true` iff `expr` is a syntactically valid 5-field cron
/// expression. Never raises an error; callers that need the reason should
/// use [`parse_schedule`]-shaped error handling via [`get_next_occurrence`].
pub fn validate_cron_expression(expr: &str) -> bool {
    parse_schedule(expr).is_ok()
}

/// Compute the strictly-next occurrence of `expr` at or after `from`,
/// evaluated in the named IANA timezone `tz`.
///
/// The reference instant and the result are both UTC; evaluation walks
/// local wall-clock fields in `tz` so that DST transitions are handled the
/// way a human reading the cron expression would expect (a spring-forward
/// gap is skipped to the next valid local time; a fall-back overlap takes
/// the first occurrence).
pub fn get_next_occurrence(
    expr: &str,
    tz: &str,
    from: DateTime<Utc>,
) -> Result<DateTime<Utc>, CronError> {
    let schedule = parse_schedule(expr)?;
    let zone = parse_timezone(tz)?;
    let from_local = from.with_timezone(&zone);

    let next_local = if schedule.includes(from_local) {
        from_local
    } else {
        schedule
            .after(&from_local)
            .next()
            .ok_or_else(|| CronError::NoOccurrence(expr.to_string()))?
    };

    Ok(next_local.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn validates_well_formed_expressions() {
        assert!(validate_cron_expression("*/5 * * * *"));
        assert!(validate_cron_expression("0 9 * * *"));
        assert!(validate_cron_expression("0 9 * * 1-5"));
        assert!(validate_cron_expression("0,30 * * * *"));
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert!(!validate_cron_expression("not a cron"));
        assert!(!validate_cron_expression("* * * *")); // only 4 fields
        assert!(!validate_cron_expression("61 * * * *")); // out of range minute
    }

    #[test]
    fn computes_next_minute_occurrence() {
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 30).unwrap();
        let next = get_next_occurrence("*/5 * * * *", "UTC", from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 12, 5, 0).unwrap());
    }

    #[test]
    fn includes_the_reference_instant_when_it_matches_exactly() {
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 12, 5, 0).unwrap();
        let next = get_next_occurrence("*/5 * * * *", "UTC", from).unwrap();
        assert_eq!(next, from);
    }

    #[test]
    fn daily_nine_am_new_york_skips_spring_forward_gap() {
        // 2026-03-08 is the US DST spring-forward date: 02:00 local jumps to 03:00.
        // A 9am schedule is unaffected by the gap itself, but this exercises
        // that evaluation happens in local time before conversion back to UTC.
        let from = Utc.with_ymd_and_hms(2026, 3, 8, 0, 0, 0).unwrap();
        let next = get_next_occurrence("0 9 * * *", "America/New_York", from).unwrap();
        let expected_utc = chrono_tz::America::New_York
            .with_ymd_and_hms(2026, 3, 8, 9, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(next, expected_utc);
    }

    #[test]
    fn hourly_schedule_skips_the_nonexistent_spring_forward_hour() {
        // At 2026-03-08 02:00 local time clocks jump to 03:00: the 2am wall
        // clock hour does not exist. An hourly schedule must step past it.
        let from = chrono_tz::America::New_York
            .with_ymd_and_hms(2026, 3, 8, 1, 30, 0)
            .unwrap()
            .with_timezone(&Utc);
        let next = get_next_occurrence("0 * * * *", "America/New_York", from).unwrap();
        let next_local = next.with_timezone(&chrono_tz::America::New_York);
        use chrono::Timelike;
        assert_eq!(next_local.hour(), 3);
    }

    #[test]
    fn unknown_timezone_is_an_error() {
        let from = Utc::now();
        let err = get_next_occurrence("* * * * *", "Not/AZone", from).unwrap_err();
        assert!(matches!(err, CronError::UnknownTimezone(_)));
    }
}
