//! Linear backoff for funding retries

use std::time::Duration;

use wc_core::config::FundingConfig;

/// Backoff whose delay grows by a fixed increment per retry
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    /// Current delay
    current: Duration,
    /// Added after every retry
    increment: Duration,
}

impl LinearBackoff {
    /// Create a new backoff from configuration
    pub fn from_config(config: &FundingConfig) -> Self {
        Self::new(config.retry_delay, config.retry_increment)
    }

    pub fn new(initial: Duration, increment: Duration) -> Self {
        Self {
            current: initial,
            increment,
        }
    }

    /// Get the next delay and advance the backoff
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_add(self.increment);
        delay
    }
}
