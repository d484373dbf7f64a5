//! Reconnect backoff schedules.
//!
//! Two schedules coexist and are deliberately not unified: the reconnection
//! controller grows a per-address delay by a fixed factor on every failure
//! ([`ExponentialBackoff`]), while externally driven scheduling uses the
//! jittered power-of-two helper ([`backoff_with_jitter`]).

use rand::Rng;
use std::time::Duration;

/// Deterministic exponential backoff state for one reconnect target.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    factor: f64,
    current: Duration,
}

impl ExponentialBackoff {
    /// Creates a backoff starting at `initial`, growing by `factor` per
    /// failure, capped at `max`.
    #[must_use]
    pub const fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        Self {
            initial,
            max,
            factor,
            current: initial,
        }
    }

    /// The current delay.
    #[must_use]
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Grows the delay by the configured factor, saturating at the cap.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn advance(&mut self) {
        let current_ms = self.current.as_millis().min(u128::from(u64::MAX)) as u64;
        let next_ms = (current_ms as f64 * self.factor) as u64;
        self.current = Duration::from_millis(next_ms).min(self.max);
    }

    /// Resets the delay to its initial value.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Jittered exponential backoff: `min(max, base * 2^attempt * (1 + u))` with
/// `u` uniform in `[-0.25, 0.25]`. Attempt zero returns `base` unchanged.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
#[must_use]
pub fn backoff_with_jitter(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return base;
    }
    let base_ms = base.as_millis().min(u128::from(u64::MAX)) as u64;
    let raw = base_ms as f64 * 2f64.powi(attempt.min(i32::MAX as u32) as i32);
    let jitter = rand::thread_rng().gen_range(-0.25..=0.25);
    let delayed = (raw * (1.0 + jitter)).min(max.as_millis() as f64);
    Duration::from_millis(delayed as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_grows_by_factor() {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_secs(1),
            Duration::from_secs(300),
            1.5,
        );
        assert_eq!(backoff.current(), Duration::from_secs(1));

        backoff.advance();
        assert_eq!(backoff.current(), Duration::from_millis(1500));
        backoff.advance();
        assert_eq!(backoff.current(), Duration::from_millis(2250));
        backoff.advance();
        assert_eq!(backoff.current(), Duration::from_millis(3375));
    }

    #[test]
    fn advance_saturates_at_max() {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_secs(1),
            Duration::from_secs(5),
            1.5,
        );
        for _ in 0..20 {
            backoff.advance();
        }
        assert_eq!(backoff.current(), Duration::from_secs(5));
    }

    #[test]
    fn reset_returns_to_initial() {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_secs(1),
            Duration::from_secs(300),
            1.5,
        );
        backoff.advance();
        backoff.advance();
        backoff.reset();
        assert_eq!(backoff.current(), Duration::from_secs(1));
    }

    #[test]
    fn jitter_attempt_zero_returns_base() {
        let base = Duration::from_secs(1);
        assert_eq!(
            backoff_with_jitter(0, base, Duration::from_secs(300)),
            base
        );
    }

    #[test]
    #[allow(clippy::cast_precision_loss)]
    fn jitter_stays_within_quarter_of_doubling() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(3600);
        for attempt in 1..=8u32 {
            let expected = 100.0 * 2f64.powi(attempt as i32);
            for _ in 0..20 {
                let delay = backoff_with_jitter(attempt, base, max).as_millis() as f64;
                assert!(
                    delay >= expected * 0.75 - 1.0 && delay <= expected * 1.25 + 1.0,
                    "attempt {attempt}: delay {delay} outside [{}, {}]",
                    expected * 0.75,
                    expected * 1.25
                );
            }
        }
    }

    #[test]
    fn jitter_is_capped_at_max() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(10);
        for _ in 0..20 {
            let delay = backoff_with_jitter(30, base, max);
            assert!(delay <= max);
        }
    }

    #[test]
    fn jitter_survives_huge_attempt_counts() {
        let delay = backoff_with_jitter(
            u32::MAX,
            Duration::from_secs(1),
            Duration::from_secs(300),
        );
        assert!(delay <= Duration::from_secs(300));
    }
}
