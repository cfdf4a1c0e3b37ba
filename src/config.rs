//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Environment variable holding the worker count.
pub const ENV_MAX_WORKERS: &str = "AI_ASSIST_MAX_WORKERS";
/// Environment variable holding the default per-task timeout, in seconds.
pub const ENV_TASK_TIMEOUT_SECS: &str = "AI_ASSIST_TASK_TIMEOUT_SECS";
/// Environment variable holding the slow-task warning threshold, in milliseconds.
pub const ENV_SLOW_TASK_MS: &str = "AI_ASSIST_SLOW_TASK_MS";
/// Environment variable holding the metrics ledger capacity.
pub const ENV_LEDGER_CAPACITY: &str = "AI_ASSIST_LEDGER_CAPACITY";

/// Executor configuration, read once at construction.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Number of worker threads in the pool.
    pub max_workers: usize,
    /// Timeout applied to submissions that don't override it.
    pub task_timeout: Duration,
    /// Successful tasks slower than this emit a warning.
    pub slow_threshold: Duration,
    /// Maximum number of task records retained by the metrics ledger.
    pub ledger_capacity: usize,
    /// Maximum number of failures reported in `recent_errors`.
    pub recent_error_limit: usize,
    /// Error descriptions stored in the ledger are cut to this many characters.
    pub max_error_len: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            task_timeout: Duration::from_secs(30),
            slow_threshold: Duration::from_millis(1000),
            ledger_capacity: 100,
            recent_error_limit: 10,
            max_error_len: 200,
        }
    }
}

impl ExecutorConfig {
    /// Load configuration from `AI_ASSIST_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_MAX_WORKERS) {
            config.max_workers = parse_value(ENV_MAX_WORKERS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_TASK_TIMEOUT_SECS) {
            let secs: f64 = parse_value(ENV_TASK_TIMEOUT_SECS, &raw)?;
            config.task_timeout = Duration::try_from_secs_f64(secs).map_err(|e| {
                ConfigError::InvalidValue {
                    key: ENV_TASK_TIMEOUT_SECS.to_string(),
                    message: e.to_string(),
                }
            })?;
        }
        if let Some(raw) = lookup(ENV_SLOW_TASK_MS) {
            config.slow_threshold = Duration::from_millis(parse_value(ENV_SLOW_TASK_MS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_LEDGER_CAPACITY) {
            config.ledger_capacity = parse_value(ENV_LEDGER_CAPACITY, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that every bound is positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(invalid(ENV_MAX_WORKERS, "must be at least 1"));
        }
        if self.task_timeout.is_zero() {
            return Err(invalid(ENV_TASK_TIMEOUT_SECS, "must be greater than zero"));
        }
        if self.ledger_capacity == 0 {
            return Err(invalid(ENV_LEDGER_CAPACITY, "must be at least 1"));
        }
        Ok(())
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }

    pub fn with_ledger_capacity(mut self, capacity: usize) -> Self {
        self.ledger_capacity = capacity;
        self
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| invalid(key, format!("'{raw}': {e}")))
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}
