//! Worker and function execution configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Worker and function execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// How long the master waits for a spawned worker to signal ready
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_worker_ready_timeout")]
    pub worker_ready_timeout: Duration,

    /// Interval between response-channel polls; liveness is re-checked
    /// every time this elapses without a reply
    #[serde(with = "crate::domains::utils::serde_duration_ms", default = "default_response_poll_interval")]
    pub response_poll_interval: Duration,

    /// Overall deadline for a single function invocation. `None` waits
    /// indefinitely (liveness checks still detect dead workers).
    #[serde(with = "crate::domains::utils::serde_duration_option", default)]
    pub execute_timeout: Option<Duration>,

    /// Bounded pool size for synchronous handler dispatch inside a worker
    #[serde(default = "default_max_sync_dispatch")]
    pub max_sync_dispatch: usize,

    /// How long to wait for a worker to exit after a stop command before
    /// force-killing it
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_worker_stop_timeout")]
    pub worker_stop_timeout: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            worker_ready_timeout: default_worker_ready_timeout(),
            response_poll_interval: default_response_poll_interval(),
            execute_timeout: None,
            max_sync_dispatch: default_max_sync_dispatch(),
            worker_stop_timeout: default_worker_stop_timeout(),
        }
    }
}

impl Validatable for ExecutionConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(
            self.worker_ready_timeout.as_secs(),
            "worker_ready_timeout",
            self.domain_name(),
        )?;
        validate_positive(
            self.response_poll_interval.as_millis(),
            "response_poll_interval",
            self.domain_name(),
        )?;
        validate_positive(self.max_sync_dispatch, "max_sync_dispatch", self.domain_name())?;
        validate_positive(
            self.worker_stop_timeout.as_secs(),
            "worker_stop_timeout",
            self.domain_name(),
        )?;

        if let Some(timeout) = self.execute_timeout {
            validate_positive(timeout.as_secs(), "execute_timeout", self.domain_name())?;
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "execution"
    }
}

fn default_worker_ready_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_response_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_max_sync_dispatch() -> usize {
    8
}

fn default_worker_stop_timeout() -> Duration {
    Duration::from_secs(5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_config_defaults() {
        let config = ExecutionConfig::default();
        assert_eq!(config.worker_ready_timeout, Duration::from_secs(30));
        assert_eq!(config.response_poll_interval, Duration::from_millis(500));
        assert!(config.execute_timeout.is_none());
        assert_eq!(config.max_sync_dispatch, 8);
    }

    #[test]
    fn test_execution_config_validation() {
        let mut config = ExecutionConfig::default();
        assert!(config.validate().is_ok());

        config.worker_ready_timeout = Duration::from_secs(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_execute_timeout_absent_by_default_in_yaml() {
        let config: ExecutionConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.execute_timeout.is_none());

        let config: ExecutionConfig = serde_yaml::from_str("execute_timeout: 120").unwrap();
        assert_eq!(config.execute_timeout, Some(Duration::from_secs(120)));
    }
}
