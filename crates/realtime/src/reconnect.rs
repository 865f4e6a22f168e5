//! Reconnection policy for the processing-status stream.
//!
//! [`ReconnectPolicy`] counts consecutive failed connection attempts and
//! decides the delay before the next one, or that there should be no next
//! one. [`wait`] sleeps for that delay unless the
//! [`CancellationToken`] fires first.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{Backoff, SyncConfig};

/// Bounded retry schedule with an attempt counter.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    interval: Duration,
    max_attempts: u32,
    backoff: Backoff,
    max_backoff: Duration,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            interval: config.reconnect_interval,
            max_attempts: config.max_reconnect_attempts,
            backoff: config.backoff,
            max_backoff: config.max_backoff,
            attempts: 0,
        }
    }

    /// Retries scheduled since the last successful connect.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Called on a successful connect.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Schedule the next retry. Returns the delay to wait first, or
    /// `None` once `max_attempts` retries have been used.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempts += 1;
        Some(self.delay_for(self.attempts))
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.interval
                    .checked_mul(factor)
                    .unwrap_or(self.max_backoff)
                    .min(self.max_backoff)
            }
        }
    }
}

/// Sleep for `delay`, returning `false` if `cancel` fires first.
pub async fn wait(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
