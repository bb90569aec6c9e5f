//! Exponential backoff between retries.
//!
//! Used for the terminal write of a job (store briefly unavailable) and by the
//! polling client between failed polls.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for a single delay.
    pub max_delay: Duration,

    /// Attempts in total, the first one included.
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, multiplier: f64) -> Self {
        Self {
            base_delay,
            multiplier,
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Delay before the next try, given the number of failures so far
    /// (1-indexed): `base_delay * multiplier^(failures - 1)`, capped.
    ///
    /// Example with base_delay=500ms, multiplier=2.0:
    /// - failure 1: 500ms
    /// - failure 2: 1s
    /// - failure 3: 2s
    pub fn next_delay(&self, failures: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = base_secs * self.multiplier.powi(exponent);
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs)
    }

    /// Whether another try is allowed after `failures` failed ones.
    pub fn allows_retry(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), 2.0)
    }
}
