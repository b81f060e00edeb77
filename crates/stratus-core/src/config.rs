use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Upper bound for `timeout_secs`: one week.
pub const MAX_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

/// Tunables of a reconciliation run.
///
/// `timeout_secs` is the single budget bounding every blocking remote wait of
/// one plan execution: retries of busy objects, task polling and lock waits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ReconcileConfig {
    pub timeout_secs: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub task_poll_interval_ms: u64,
    pub import_separator: String,
    pub max_parallel: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            initial_backoff_ms: 250,
            max_backoff_ms: 5000,
            task_poll_interval_ms: 200,
            import_separator: ".".to_owned(),
            max_parallel: 4,
        }
    }
}

impl ReconcileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_str(&content)
    }

    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be > 0".to_owned()));
        }
        if self.timeout_secs > MAX_TIMEOUT_SECS {
            return Err(ConfigError::Invalid(format!(
                "timeout_secs must be <= {MAX_TIMEOUT_SECS}"
            )));
        }
        if self.initial_backoff_ms == 0 {
            return Err(ConfigError::Invalid(
                "initial_backoff_ms must be > 0".to_owned(),
            ));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ConfigError::Invalid(format!(
                "max_backoff_ms ({}) must be >= initial_backoff_ms ({})",
                self.max_backoff_ms, self.initial_backoff_ms
            )));
        }
        if self.import_separator.is_empty() {
            return Err(ConfigError::Invalid(
                "import_separator must not be empty".to_owned(),
            ));
        }
        if self.max_parallel == 0 {
            return Err(ConfigError::Invalid("max_parallel must be >= 1".to_owned()));
        }
        Ok(())
    }

    /// The budget of one plan execution, clamped to [`MAX_TIMEOUT_SECS`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.min(MAX_TIMEOUT_SECS))
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn task_poll_interval(&self) -> Duration {
        Duration::from_millis(self.task_poll_interval_ms)
    }
}
