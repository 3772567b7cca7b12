//! Pipeline configuration loading and representation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::jobs::RetryPolicy;
use crate::workers::WorkerPoolConfig;

pub const ENV_WORKERS: &str = "ORDERFLOW_WORKERS";
pub const ENV_QUEUE_CAPACITY: &str = "ORDERFLOW_QUEUE_CAPACITY";
pub const ENV_MAX_ATTEMPTS: &str = "ORDERFLOW_MAX_ATTEMPTS";
pub const ENV_BASE_DELAY_MS: &str = "ORDERFLOW_BASE_DELAY_MS";
pub const ENV_MAX_DELAY_MS: &str = "ORDERFLOW_MAX_DELAY_MS";
pub const ENV_CHECKOUT_TIMEOUT_MS: &str = "ORDERFLOW_CHECKOUT_TIMEOUT_MS";
pub const ENV_POLL_INTERVAL_MS: &str = "ORDERFLOW_POLL_INTERVAL_MS";
pub const ENV_SHUTDOWN_TIMEOUT_MS: &str = "ORDERFLOW_SHUTDOWN_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be {expected}, got {value:?}")]
    Parse {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Tunables for the whole checkout pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Worker threads started by the pool
    pub workers: usize,
    /// Job queue capacity (ready and delayed jobs)
    pub queue_capacity: usize,
    pub retry: RetryPolicy,
    /// How long `checkout` waits for queue space
    pub checkout_timeout: Duration,
    /// How long an idle worker blocks on the queue per poll
    pub poll_interval: Duration,
    /// Deadline for stopping the pool
    pub shutdown_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1_024,
            retry: RetryPolicy::default(),
            checkout_timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(50),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl PipelineConfig {
    /// Load from process environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` as the variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(workers) = parse_var(&lookup, ENV_WORKERS)? {
            config.workers = workers;
        }
        if let Some(capacity) = parse_var(&lookup, ENV_QUEUE_CAPACITY)? {
            config.queue_capacity = capacity;
        }
        if let Some(max_attempts) = parse_var(&lookup, ENV_MAX_ATTEMPTS)? {
            config.retry.max_attempts = max_attempts;
        }
        if let Some(ms) = parse_var(&lookup, ENV_BASE_DELAY_MS)? {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, ENV_MAX_DELAY_MS)? {
            config.retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, ENV_CHECKOUT_TIMEOUT_MS)? {
            config.checkout_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, ENV_POLL_INTERVAL_MS)? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, ENV_SHUTDOWN_TIMEOUT_MS)? {
            config.shutdown_timeout = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_checkout_timeout(mut self, timeout: Duration) -> Self {
        self.checkout_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(ConfigError::Invalid(format!(
                "retry.base_delay {:?} exceeds retry.max_delay {:?}",
                self.retry.base_delay, self.retry.max_delay
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("poll_interval must be non-zero".into()));
        }
        Ok(())
    }

    pub fn pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::default()
            .with_poll_interval(self.poll_interval)
            .with_shutdown_timeout(self.shutdown_timeout)
    }
}

fn parse_var<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed.parse().map(Some).map_err(|_| ConfigError::Parse {
        key,
        value: raw.clone(),
        expected: "a non-negative integer",
    })
}
