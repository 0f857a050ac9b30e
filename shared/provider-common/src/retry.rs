//! Retry configuration and the linear backoff used between attempts
//!
//! Within one provider, the wait after the n-th failed attempt is
//! `base_delay * n` (1s, 2s, 3s, ... with the default base). No wait follows
//! the final attempt, and moving on to the next provider is immediate.

use backoff::backoff::Backoff;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per provider, at least one
    pub attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
        }
    }
}

impl RetryConfig {
    pub fn new(attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay_ms,
        }
    }

    /// One attempt per provider, straight to failover
    pub fn no_retry() -> Self {
        Self::new(1, 0)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn backoff(&self) -> LinearBackoff {
        LinearBackoff::new(self.base_delay())
    }
}

/// Backoff whose n-th interval is `base * n`
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    base: Duration,
    step: u32,
}

impl LinearBackoff {
    pub fn new(base: Duration) -> Self {
        Self { base, step: 0 }
    }
}

impl Backoff for LinearBackoff {
    fn reset(&mut self) {
        self.step = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        self.step = self.step.checked_add(1)?;
        self.base.checked_mul(self.step)
    }
}
