//! Retry and backoff decisions per error class.
//!
//! Schedule: `base · 2^(attempt-1)`, capped at `max_delay`, then scaled by a
//! random factor in `[1 - jitter, 1 + jitter]` (and capped again). Service
//! outages and timeouts start from twice the base delay of rate limiting,
//! since a 503 usually means the backend needs longer to recover than a 429
//! window takes to reset.
//!
//! With the fast preset (500 ms base, no jitter) a rate-limited batch waits
//! 500 ms → 1 s; with the slow preset (2 s base) 2 s → 4 s → 8 s → 16 s.

use crate::config::PipelineConfig;
use crate::error::ErrorKind;
use rand::Rng;
use std::time::Duration;

/// Outcome of [`RetryPolicy::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the given delay, then call the model again.
    Retry(Duration),
    /// Stop; the batch is recorded as failed.
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: f64,
}

impl RetryPolicy {
    /// A policy without jitter.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, ratio: f64) -> Self {
        self.jitter = ratio.clamp(0.0, 1.0);
        self
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.max_retries, config.base_delay, config.max_delay)
            .with_jitter(config.jitter)
    }

    /// Total model calls allowed per batch, first attempt included.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide what to do after attempt number `attempt` (1-based) failed with `kind`.
    ///
    /// Every retryable kind, `RateLimited` included, draws from the same
    /// `max_attempts` budget: a batch that is still rate limited after the
    /// last attempt is recorded as failed and picked up again on the next run.
    pub fn decide(&self, kind: ErrorKind, attempt: u32) -> RetryDecision {
        if !kind.is_retryable() || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry(self.delay(kind, attempt))
    }

    /// Backoff before the attempt following attempt number `attempt`.
    pub fn delay(&self, kind: ErrorKind, attempt: u32) -> Duration {
        let base = match kind {
            ErrorKind::RateLimited => self.base_delay,
            _ => self.base_delay.saturating_mul(2),
        };
        let exponent = attempt.saturating_sub(1).min(31);
        let nominal = base.saturating_mul(1u32 << exponent).min(self.max_delay);

        if self.jitter == 0.0 {
            return nominal;
        }
        let factor = rand::rng().random_range(1.0 - self.jitter..=1.0 + self.jitter);
        nominal.mul_f64(factor).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessingMode;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(10))
    }

    #[test]
    fn non_retryable_kinds_give_up_immediately() {
        let p = policy();
        assert_eq!(p.decide(ErrorKind::ClientError, 1), RetryDecision::GiveUp);
        assert_eq!(p.decide(ErrorKind::Malformed, 1), RetryDecision::GiveUp);
    }

    #[test]
    fn retryable_until_budget_exhausted() {
        let p = policy();
        assert!(matches!(p.decide(ErrorKind::ServiceUnavailable, 1), RetryDecision::Retry(_)));
        assert!(matches!(p.decide(ErrorKind::ServiceUnavailable, 2), RetryDecision::Retry(_)));
        assert_eq!(p.decide(ErrorKind::ServiceUnavailable, 3), RetryDecision::GiveUp);
        assert_eq!(p.decide(ErrorKind::Timeout, 3), RetryDecision::GiveUp);
        assert!(matches!(p.decide(ErrorKind::RateLimited, 2), RetryDecision::Retry(_)));
    }

    #[test]
    fn delays_double_and_are_capped() {
        let p = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_millis(700));
        assert_eq!(p.delay(ErrorKind::RateLimited, 1), Duration::from_millis(100));
        assert_eq!(p.delay(ErrorKind::RateLimited, 2), Duration::from_millis(200));
        assert_eq!(p.delay(ErrorKind::RateLimited, 3), Duration::from_millis(400));
        assert_eq!(p.delay(ErrorKind::RateLimited, 4), Duration::from_millis(700));
        assert_eq!(p.delay(ErrorKind::RateLimited, 40), Duration::from_millis(700));
    }

    #[test]
    fn outages_back_off_longer_than_rate_limits() {
        let p = policy();
        for attempt in 1..3 {
            assert!(
                p.delay(ErrorKind::ServiceUnavailable, attempt)
                    > p.delay(ErrorKind::RateLimited, attempt)
            );
            assert_eq!(
                p.delay(ErrorKind::Timeout, attempt),
                p.delay(ErrorKind::ServiceUnavailable, attempt)
            );
        }
    }

    #[test]
    fn jitter_spreads_delays() {
        let p = RetryPolicy::new(5, Duration::from_millis(1000), Duration::from_secs(60))
            .with_jitter(0.5);
        let delays: std::collections::HashSet<Duration> =
            (0..50).map(|_| p.delay(ErrorKind::Timeout, 2)).collect();
        assert!(delays.len() > 1, "jitter produced a single value: {delays:?}");
    }

    #[test]
    fn rate_limits_share_the_attempt_budget() {
        let p = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(10));
        assert!(matches!(p.decide(ErrorKind::RateLimited, 2), RetryDecision::Retry(_)));
        assert_eq!(p.decide(ErrorKind::RateLimited, 3), RetryDecision::GiveUp);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let p = RetryPolicy::new(5, Duration::from_millis(1000), Duration::from_secs(60))
            .with_jitter(0.25);
        for _ in 0..200 {
            let d = p.delay(ErrorKind::RateLimited, 1);
            assert!(d >= Duration::from_millis(750), "{d:?}");
            assert!(d <= Duration::from_millis(1250), "{d:?}");
        }
    }

    #[test]
    fn slow_mode_waits_at_least_as_long_as_fast_mode() {
        let fast = RetryPolicy::from_config(
            &PipelineConfig::builder().jitter(0.0).build().unwrap(),
        );
        let slow = RetryPolicy::from_config(
            &PipelineConfig::builder_for(ProcessingMode::Slow)
                .jitter(0.0)
                .build()
                .unwrap(),
        );
        assert_eq!(fast.max_attempts(), 3);
        assert_eq!(slow.max_attempts(), 5);
        for attempt in 1..3 {
            assert!(
                slow.delay(ErrorKind::RateLimited, attempt)
                    > fast.delay(ErrorKind::RateLimited, attempt)
            );
        }
    }
}
