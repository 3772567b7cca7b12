//! Retry policy: how long a failed job waits and how many attempts it gets.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^attempt
    #[default]
    Exponential,
    /// Linear backoff: base * (attempt + 1)
    Linear,
}

/// Retry policy configuration.
///
/// `max_attempts` bounds *total* attempts, not retries: attempts
/// `0..max_attempts` run, and failure of attempt `max_attempts - 1` sends the
/// job to the dead-letter sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Backoff strategy
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with a single attempt (failures dead-letter immediately).
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Create a policy with fixed delays.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    /// Create a policy with exponential backoff.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Delay to wait after attempt `attempt` (0-indexed) failed.
    ///
    /// Exponential: `next_delay(0) = base`, `next_delay(1) = 2 * base`, ...
    /// always capped at `max_delay`.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let uncapped = match self.strategy {
            BackoffStrategy::Fixed => Some(self.base_delay),
            BackoffStrategy::Exponential => 2u32
                .checked_pow(attempt)
                .and_then(|factor| self.base_delay.checked_mul(factor)),
            BackoffStrategy::Linear => attempt
                .checked_add(1)
                .and_then(|factor| self.base_delay.checked_mul(factor)),
        };

        uncapped.unwrap_or(self.max_delay).min(self.max_delay)
    }

    /// Whether a job whose attempt `attempt` just failed gets another try.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt.saturating_add(1) < self.max_attempts
    }
}
