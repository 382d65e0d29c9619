//! Reconnection policy: attempt accounting and exponential backoff.

use std::time::Duration;

use crate::constants::{DEFAULT_BASE_BACKOFF_MS, DEFAULT_MAX_RECONNECT_ATTEMPTS};

/// Attempt counter plus the backoff schedule for automatic reconnection.
///
/// `delay(n) = min(cap, base * 2^(n-1))` for attempt `n >= 1`. The counter
/// only moves forward through [`ReconnectPolicy::next_attempt`] and returns
/// to zero on every successful open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    attempts: u32,
    max_attempts: u32,
    base: Duration,
    cap: Option<Duration>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_RECONNECT_ATTEMPTS,
            Duration::from_millis(DEFAULT_BASE_BACKOFF_MS),
            None,
        )
    }
}

impl ReconnectPolicy {
    /// Create a policy with the given budget, base delay and optional cap.
    #[must_use]
    pub fn new(max_attempts: u32, base: Duration, cap: Option<Duration>) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            base,
            cap,
        }
    }

    /// Attempts consumed since the last successful open.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Retry budget.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another automatic attempt may be scheduled.
    #[must_use]
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Consume one attempt and return its number together with its delay.
    ///
    /// Returns `None` once the budget is spent; the counter is left untouched.
    pub fn next_attempt(&mut self) -> Option<(u32, Duration)> {
        if !self.can_retry() {
            return None;
        }
        self.attempts += 1;
        Some((self.attempts, self.delay(self.attempts)))
    }

    /// Back to a fresh budget.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Delay before attempt `n` (1-based). `n = 0` is treated as 1.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        let uncapped = self.base.saturating_mul(factor);
        match self.cap {
            Some(cap) => uncapped.min(cap),
            None => uncapped,
        }
    }
}
