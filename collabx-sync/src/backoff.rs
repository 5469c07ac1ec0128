//! Exponential backoff for automatic reconnection.
//!
//! Attempt `n` (1-based) waits `min(base_delay × 2^(n-1), max_delay)`.
//! With the default policy that is 1s, 2s, 4s, 8s, 10s and then nothing:
//! the channel stays `Disconnected` until someone calls `connect()` again.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a channel retries after an unexpected close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Retries allowed before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the 1-based `attempt`, or `None` past `max_attempts`.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        // 2^31 already saturates any sane max_delay
        let factor = 1u32 << (attempt - 1).min(31);
        Some(self.base_delay.saturating_mul(factor).min(self.max_delay))
    }
}

/// Attempt counter driven by a [`ReconnectPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Delay before the next retry, or `None` once retries are exhausted.
    ///
    /// Exhaustion is sticky until [`reset`](Self::reset).
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_attempts {
            return None;
        }
        self.attempt += 1;
        self.policy.delay_for(self.attempt)
    }

    /// Called on every successful open.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Retries scheduled since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }
}
