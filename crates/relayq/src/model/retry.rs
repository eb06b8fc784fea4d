use serde::{Deserialize, Serialize};

/// How `nextAttemptAt` is computed after a failed attempt.
///
/// Defaults to [`BackoffKind::Exponential`] — `2^attempts` minutes, capped
/// by `retry_delay_max_ms` when one is configured. [`BackoffKind::Linear`]
/// schedules a fixed `retry_delay_ms` after every failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackoffKind {
    Exponential,
    Linear,
}

impl Default for BackoffKind {
    fn default() -> Self {
        BackoffKind::Exponential
    }
}

/// Retry knobs carried by a job (and inherited by cron-enqueued jobs from
/// their schedule's template).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub backoff: BackoffKind,
    /// Fixed delay used by [`BackoffKind::Linear`]; ignored otherwise.
    pub retry_delay_ms: Option<i64>,
    /// Upper bound applied to the computed delay regardless of backoff
    /// kind.
    pub retry_delay_max_ms: Option<i64>,
}

impl RetryPolicy {
    /// `next_attempt_at = now + backoff(attempts)`: exponential `2^attempts`
    /// minutes by default, capped by `retry_delay_max_ms` when set;
    /// otherwise linear `retry_delay_ms`.
    ///
    /// `attempts` is the 0-indexed attempt count *before* this failure
    /// (the first failure uses `attempts == 0`, producing a 1 minute
    /// delay for the default exponential policy).
    pub fn backoff_delay_ms(&self, attempts: i32) -> i64 {
        let raw = match self.backoff {
            BackoffKind::Exponential => {
                let minutes = 2i64.saturating_pow(attempts.max(0) as u32);
                minutes.saturating_mul(60_000)
            }
            BackoffKind::Linear => self.retry_delay_ms.unwrap_or(60_000),
        };
        match self.retry_delay_max_ms {
            Some(max) => raw.min(max),
            None => raw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_each_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay_ms(0), 60_000);
        assert_eq!(policy.backoff_delay_ms(1), 120_000);
        assert_eq!(policy.backoff_delay_ms(2), 240_000);
    }

    #[test]
    fn exponential_backoff_respects_cap() {
        let policy = RetryPolicy {
            backoff: BackoffKind::Exponential,
            retry_delay_ms: None,
            retry_delay_max_ms: Some(150_000),
        };
        assert_eq!(policy.backoff_delay_ms(0), 60_000);
        assert_eq!(policy.backoff_delay_ms(1), 120_000);
        assert_eq!(policy.backoff_delay_ms(2), 150_000);
    }

    #[test]
    fn linear_backoff_uses_fixed_delay() {
        let policy = RetryPolicy {
            backoff: BackoffKind::Linear,
            retry_delay_ms: Some(5_000),
            retry_delay_max_ms: None,
        };
        assert_eq!(policy.backoff_delay_ms(0), 5_000);
        assert_eq!(policy.backoff_delay_ms(3), 5_000);
    }
}
