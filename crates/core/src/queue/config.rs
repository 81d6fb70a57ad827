//! Queue redelivery configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry configuration for queue redelivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum delivery attempts per job.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt in seconds.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,

    /// Maximum delay between attempts in seconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,

    /// Exponential backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> u64 {
    5
}

fn default_max_delay() -> u64 {
    300 // 5 minutes
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_secs: default_initial_delay(),
            max_delay_secs: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_delay(mut self, secs: u64) -> Self {
        self.initial_delay_secs = secs;
        self
    }

    /// Delay before redelivering after failed attempt number `attempt`
    /// (1-based): `initial × multiplier^(attempt-1)`, capped at the maximum.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay_secs as f64 * self.backoff_multiplier.powi(exponent);
        let capped = secs.min(self.max_delay_secs as f64).max(0.0);
        Duration::from_secs_f64(capped)
    }

    /// Whether another delivery is allowed after `attempt` attempts.
    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
