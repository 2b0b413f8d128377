//! Exponential backoff for failed sync attempts.

use std::time::Duration;

/// Doubling delay with a cap, reset on the first success.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    consecutive_failures: u32,
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base: Duration::from_millis(base_ms),
            max: Duration::from_millis(max_ms),
            consecutive_failures: 0,
        }
    }

    /// Record a failure and return the delay to wait before the next
    /// attempt: `base * 2^(failures - 1)`, capped at `max`.
    pub fn next_delay(&mut self) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        // Past ~16 doublings every realistic base is above the cap.
        let exponent = self.consecutive_failures.saturating_sub(1).min(16);
        self.base.saturating_mul(1u32 << exponent).min(self.max)
    }

    /// A successful attempt clears the failure streak; the next failure
    /// starts again from the base delay.
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.consecutive_failures
    }
}
