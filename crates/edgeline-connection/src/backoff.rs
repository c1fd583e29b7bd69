//! Exponential backoff policy for reconnection

use std::time::Duration;

/// Computes retry delays and counts attempts against a maximum.
///
/// The handler never sleeps; callers decide how to wait for the returned
/// delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffHandler {
    /// Maximum number of grants before the handler reports exhaustion
    pub max_retries: u32,
    /// Delay of the first grant; every further grant doubles it
    pub base_time: Duration,
    /// Keep granting after `max_retries`, with the delay capped at the last step
    pub retry_forever: bool,
    retries: u32,
}

impl BackoffHandler {
    pub fn new(max_retries: u32, base_time: Duration) -> Self {
        Self {
            max_retries,
            base_time,
            retry_forever: false,
            retries: 0,
        }
    }

    pub fn with_retry_forever(mut self, retry_forever: bool) -> Self {
        self.retry_forever = retry_forever;
        self
    }

    /// Returns the next delay, or `None` once `max_retries` grants were handed out.
    ///
    /// The delay is `base_time * 2^retries` using the count before this grant.
    pub fn compute_backoff(&mut self) -> Option<Duration> {
        if self.retries >= self.max_retries {
            if self.retry_forever {
                return Some(self.delay_for(self.max_retries));
            }
            return None;
        }

        let delay = self.delay_for(self.retries);
        self.retries += 1;
        Some(delay)
    }

    /// Reset the retry counter (call after a successful connection)
    pub fn reset(&mut self) {
        self.retries = 0;
    }

    /// Number of grants consumed since the last reset
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn reached_max_retries(&self) -> bool {
        self.retries >= self.max_retries
    }

    fn delay_for(&self, retries: u32) -> Duration {
        // Saturate instead of overflowing for very large retry budgets
        let factor = 1u32.checked_shl(retries).unwrap_or(u32::MAX);
        self.base_time.saturating_mul(factor)
    }
}

impl Default for BackoffHandler {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1))
    }
}
