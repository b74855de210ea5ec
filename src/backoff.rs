//! Retry policy for invite generation.
//!
//! Two inputs decide the next delivery delay: the provider's own wait hint,
//! which always wins, and otherwise exponential backoff on the attempt count:
//!
//! ```text
//! delay = min(base * 2^attempts, cap)
//! ```
//!
//! The store's claim applies [`RetryPolicy::exhausted`] atomically with the
//! attempt increment.

use std::time::Duration;

/// Default per-request attempt ceiling.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default backoff base.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(5);
/// Backoff never schedules further out than this.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Deliveries beyond this count fail the request.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT: Self = Self {
        max_attempts: DEFAULT_MAX_ATTEMPTS,
        base_delay: DEFAULT_BASE_DELAY,
        max_delay: DEFAULT_MAX_DELAY,
    };

    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Exponential delay after `attempts` deliveries, capped at `max_delay`.
    pub fn backoff(&self, attempts: u32) -> Duration {
        // Clamp the exponent so neither the shift nor the multiply overflows.
        let factor = 1u32.checked_shl(attempts.min(31)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before the next delivery. A provider hint is honoured as-is.
    pub fn next_delay(&self, attempts: u32, retry_after: Option<Duration>) -> Duration {
        retry_after.unwrap_or_else(|| self.backoff(attempts))
    }

    /// Would a request at `attempts` fail on its next claim?
    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts > self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}
