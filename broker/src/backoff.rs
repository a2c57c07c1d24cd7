//! Exponential backoff schedule for connection rebuilds

use std::time::Duration;

/// Configuration for exponential backoff
///
/// Delays are deterministic: attempt `n` waits
/// `initial_delay * multiplier^(n-1)`, capped at `max_delay`. Attempt 0 is
/// the initial try and has no delay.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry (e.g. 100ms)
    pub initial_delay: Duration,
    /// Maximum delay between retries (e.g. 5s)
    pub max_delay: Duration,
    /// Multiplier for each retry (e.g. 2.0 for doubling)
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Calculate the delay for attempt n (0-indexed; attempt 0 is the
    /// initial try and returns zero).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        // Use microseconds for precision with small delays
        let base_us =
            self.initial_delay.as_micros() as f64 * self.multiplier.powi((attempt - 1) as i32);
        let base_us = base_us.min(self.max_delay.as_micros() as f64);

        Duration::from_micros(base_us as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_zero_is_zero() {
        let config = BackoffConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
    }

    #[test]
    fn test_delays_start_at_initial_and_double() {
        let config = BackoffConfig::default();

        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(800));
        assert_eq!(config.delay_for_attempt(5), Duration::from_millis(1600));
    }

    #[test]
    fn test_delays_cap_at_max() {
        let config = BackoffConfig::default();

        // 100ms * 2^6 = 6.4s, capped at 5s.
        assert_eq!(config.delay_for_attempt(7), Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(30), Duration::from_secs(5));
    }

    #[test]
    fn test_delays_are_non_decreasing() {
        let config = BackoffConfig::default();

        let mut previous = Duration::ZERO;
        for attempt in 0..40 {
            let delay = config.delay_for_attempt(attempt);
            assert!(
                delay >= previous,
                "attempt {attempt}: {delay:?} < {previous:?}"
            );
            assert!(delay <= config.max_delay);
            previous = delay;
        }
    }
}
