//! Linear, capped backoff.
//!
//! The same function drives connection retries and pairing retries; only
//! the constants differ.

use std::time::Duration;

/// Compute `min(base + attempt * step, cap)`.
///
/// Arithmetic saturates, so very large attempt counts land on `cap`.
pub fn delay(attempt: u32, base: Duration, step: Duration, cap: Duration) -> Duration {
    step.checked_mul(attempt)
        .and_then(|scaled| base.checked_add(scaled))
        .unwrap_or(Duration::MAX)
        .min(cap)
}

/// Backoff constants for one retry purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Added per attempt.
    pub step: Duration,
    /// Upper bound.
    pub cap: Duration,
}

impl BackoffPolicy {
    pub const fn new(base: Duration, step: Duration, cap: Duration) -> Self {
        Self { base, step, cap }
    }

    /// Policy with no base delay: `min(step * attempt, cap)`.
    pub const fn multiplicative(step: Duration, cap: Duration) -> Self {
        Self {
            base: Duration::ZERO,
            step,
            cap,
        }
    }

    /// Delay for the given attempt number.
    pub fn delay(&self, attempt: u32) -> Duration {
        delay(attempt, self.base, self.step, self.cap)
    }
}
