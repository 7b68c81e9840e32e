//! Exponential backoff policy.

use rand::Rng;
use std::time::Duration;

/// Per-backend retry configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per backend, including the first.
    pub max_attempts: usize,

    /// Base wait in seconds before the first retry.
    pub base_interval: f64,

    /// Multiplier applied per retry.
    pub backoff_factor: f64,

    /// Ceiling on a single wait.
    pub max_interval: f64,

    /// Randomize waits to spread contending callers.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Policy with the given attempt count and production defaults
    /// (1s base, doubling, jittered).
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            base_interval: 1.0,
            backoff_factor: 2.0,
            max_interval: 30.0,
            jitter: true,
        }
    }

    /// Set the base interval.
    pub fn with_base_interval(mut self, seconds: f64) -> Self {
        self.base_interval = seconds;
        self
    }

    /// Disable jitter. Test helper; production keeps it on.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Wait before retry number `attempt` (0-indexed): base * factor^attempt,
    /// capped, with optional jitter in [0.5, 1.5].
    pub fn delay(&self, attempt: usize) -> Duration {
        let base = self.base_interval * self.backoff_factor.powi(attempt as i32);
        let capped = base.min(self.max_interval);
        let final_delay = if self.jitter {
            capped * rand::thread_rng().gen_range(0.5..=1.5)
        } else {
            capped
        };
        Duration::from_secs_f64(final_delay)
    }

    /// Whether another attempt is allowed after `attempt` attempts.
    pub fn should_retry(&self, attempt: usize) -> bool {
        attempt + 1 < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double_from_base() {
        let policy = RetryPolicy::new(3).without_jitter();
        assert_eq!(policy.delay(0), Duration::from_secs_f64(1.0));
        assert_eq!(policy.delay(1), Duration::from_secs_f64(2.0));
        assert_eq!(policy.delay(2), Duration::from_secs_f64(4.0));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::new(10).without_jitter();
        assert_eq!(policy.delay(20), Duration::from_secs_f64(30.0));
    }

    #[test]
    fn test_should_retry_counts_attempts() {
        let policy = RetryPolicy::new(3);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }
}
