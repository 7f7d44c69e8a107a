//! Exponential backoff with jitter for feed reconnection

use std::time::Duration;

/// Exponential backoff calculator with jitter
#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    attempt: u32,
}

impl Backoff {
    /// Create a new backoff starting at `base_ms` with a cap of `max_ms`.
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            attempt: 0,
        }
    }

    pub fn from_config(config: &crate::config::EngineConfig) -> Self {
        Self::new(config.backoff_base_ms, config.backoff_max_ms)
    }

    /// Get the next delay and increment the attempt counter.
    ///
    /// The jitter is taken out of the capped value, so a delay never exceeds
    /// `max_ms`.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.base_ms.saturating_mul(1u64.checked_shl(self.attempt).unwrap_or(u64::MAX));
        let capped = exp.min(self.max_ms);
        let jitter = rand::random::<u64>() % (capped / 4 + 1);
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(capped - jitter)
    }

    /// Number of consecutive failures since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Reset after a successful poll.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
