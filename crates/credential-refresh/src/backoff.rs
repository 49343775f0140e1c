//! Exponential backoff between refresh attempts.
//!
//! Turns the coordinator's consecutive-failure count into the wait applied
//! before its next attempt: `min(base * 2^(failures - 1), max)`, zero when
//! there have been no failures. Callers reading a fresh cached token are never
//! delayed by this policy.

use rand::Rng;
use std::time::Duration;

/// Default delay after the first failure.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(1000);

/// Default ceiling for the backoff delay.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_millis(30_000);

/// Exponential backoff with a ceiling and optional jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
    jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX)
    }
}

impl BackoffPolicy {
    /// Create a deterministic policy.
    ///
    /// A `max` below `base` is raised to `base`.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter: 0.0,
        }
    }

    /// Shorten each delay by a random amount of up to `fraction` of it.
    ///
    /// `fraction` is clamped to `0.0..=1.0`. Jitter only ever subtracts, so
    /// the ceiling still holds.
    #[must_use]
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        self
    }

    /// Delay after the first failure.
    #[must_use]
    pub fn base(&self) -> Duration {
        self.base
    }

    /// Upper bound for any delay.
    #[must_use]
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Delay for `failures` consecutive failures, without jitter.
    #[must_use]
    pub fn ceiling_delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = failures - 1;
        match 1u32.checked_shl(exponent) {
            Some(factor) => self.base.saturating_mul(factor).min(self.max),
            None => self.max,
        }
    }

    /// Delay to wait before the next attempt after `failures` consecutive failures.
    #[must_use]
    pub fn next_delay(&self, failures: u32) -> Duration {
        let delay = self.ceiling_delay(failures);
        if self.jitter == 0.0 || delay.is_zero() {
            return delay;
        }
        let cut = delay.mul_f64(self.jitter * rand::thread_rng().gen::<f64>());
        delay.saturating_sub(cut)
    }
}
