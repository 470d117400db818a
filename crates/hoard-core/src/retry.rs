//! Per-item retry decisions with exponential backoff and jitter.
//!
//! Delay schedule for attempt `n` (1-indexed, the attempt that just failed):
//!
//! ```text
//! delay = min(base * 2^(n-1) + U[0, base/2), max_delay)
//! ```

use std::time::Duration;

use crate::error::ErrorClass;
use crate::item::ItemOutcome;

/// Retry configuration with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total tries per item, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
        }
    }
}

/// What to do with an item after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Requeue at the tail once the delay has elapsed.
    Retry(Duration),
    /// Run the cleanup routine, then requeue once the delay has elapsed.
    RetryAfterCleanup(Duration),
    /// Out of attempts.
    Exhausted,
    /// The failure will not go away by retrying.
    Permanent,
}

impl Decision {
    pub fn will_retry(&self) -> bool {
        matches!(self, Decision::Retry(_) | Decision::RetryAfterCleanup(_))
    }

    pub fn delay(&self) -> Option<Duration> {
        match self {
            Decision::Retry(d) | Decision::RetryAfterCleanup(d) => Some(*d),
            Decision::Exhausted | Decision::Permanent => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Decides the fate of an item whose latest attempt (already recorded in
    /// `outcome.attempts`) failed with `class`.
    pub fn decide(&self, outcome: &ItemOutcome, class: ErrorClass) -> Decision {
        let attempts = outcome.attempt_count();

        if class.is_permanent() {
            return Decision::Permanent;
        }

        // One cleanup-then-retry per item, even past max_attempts.
        if class == ErrorClass::DiskSpace {
            return if outcome.failures_of(ErrorClass::DiskSpace) <= 1 {
                Decision::RetryAfterCleanup(self.delay_for_attempt(attempts))
            } else {
                Decision::Permanent
            };
        }

        if attempts >= self.config.max_attempts {
            return Decision::Exhausted;
        }

        Decision::Retry(self.delay_for_attempt(attempts))
    }

    /// Backoff delay after the given (1-indexed) attempt failed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay;
        let exponent = attempt.saturating_sub(1).min(20);
        let backoff = base.saturating_mul(1u32 << exponent);
        let jitter = Duration::from_millis(rand_jitter_ms(base.as_millis() as u64 / 2));
        std::cmp::min(backoff.saturating_add(jitter), self.config.max_delay)
    }
}

// ---------------------------------------------------------------------------
// Jitter: xorshift64 seeded from the clock, no rand dependency.
// ---------------------------------------------------------------------------

pub(crate) fn rand_jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    // Mix in a per-call counter so concurrent workers don't draw the same value.
    x ^= JITTER_COUNTER
        .fetch_add(0x9E37_79B9_7F4A_7C15, std::sync::atomic::Ordering::Relaxed);
    // xorshift64
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % max_ms
}

static JITTER_COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
