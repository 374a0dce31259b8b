//! Configuration loading and environment variable handling

use crate::domains::NimbusConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::Path;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "NIMBUS".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<NimbusConfig> {
        let content = std::fs::read_to_string(path)?;
        let mut config: NimbusConfig = serde_yaml::from_str(&content)?;

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<NimbusConfig> {
        let mut config = NimbusConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<NimbusConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut NimbusConfig) -> ConfigResult<()> {
        self.apply_server_overrides(&mut config.server)?;
        self.apply_execution_overrides(&mut config.execution)?;
        self.apply_projects_overrides(&mut config.projects)?;
        self.apply_tasks_overrides(&mut config.tasks)?;
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    /// Apply server config overrides
    fn apply_server_overrides(
        &self,
        config: &mut crate::domains::server::ServerConfig,
    ) -> ConfigResult<()> {
        if let Ok(bind) = self.get_env_var("SERVER_BIND_ADDRESS") {
            config.bind_address = bind;
        }

        if let Ok(port) = self.get_env_var("SERVER_PORT") {
            config.port = port
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid SERVER_PORT: {}", e)))?;
        }

        Ok(())
    }

    /// Apply execution config overrides
    fn apply_execution_overrides(
        &self,
        config: &mut crate::domains::execution::ExecutionConfig,
    ) -> ConfigResult<()> {
        if let Ok(ready_timeout) = self.get_env_var("WORKER_READY_TIMEOUT") {
            let seconds: u64 = ready_timeout.parse().map_err(|e| {
                ConfigError::EnvError(format!("Invalid WORKER_READY_TIMEOUT: {}", e))
            })?;
            config.worker_ready_timeout = std::time::Duration::from_secs(seconds);
        }

        if let Ok(exec_timeout) = self.get_env_var("EXECUTE_TIMEOUT") {
            let seconds: u64 = exec_timeout
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid EXECUTE_TIMEOUT: {}", e)))?;
            config.execute_timeout = Some(std::time::Duration::from_secs(seconds));
        }

        if let Ok(max_sync) = self.get_env_var("MAX_SYNC_DISPATCH") {
            config.max_sync_dispatch = max_sync
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid MAX_SYNC_DISPATCH: {}", e)))?;
        }

        Ok(())
    }

    /// Apply projects config overrides
    fn apply_projects_overrides(
        &self,
        config: &mut crate::domains::projects::ProjectsConfig,
    ) -> ConfigResult<()> {
        if let Ok(dir) = self.get_env_var("PROJECTS_DIR") {
            config.projects_dir = dir.into();
        }

        Ok(())
    }

    /// Apply task manager config overrides
    fn apply_tasks_overrides(
        &self,
        config: &mut crate::domains::tasks::TaskConfig,
    ) -> ConfigResult<()> {
        if let Ok(dir) = self.get_env_var("TASKS_DIR") {
            config.tasks_dir = dir.into();
        }

        if let Ok(days) = self.get_env_var("TASK_RETENTION_DAYS") {
            config.retention_days = days
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid TASK_RETENTION_DAYS: {}", e)))?;
        }

        Ok(())
    }

    /// Apply logging config overrides
    fn apply_logging_overrides(
        &self,
        config: &mut crate::domains::logging::LoggingConfig,
    ) -> ConfigResult<()> {
        use std::str::FromStr;

        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = crate::domains::logging::LogLevel::from_str(&log_level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", log_level)))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = crate::domains::logging::LogFormat::from_str(&format)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", format)))?;
        }

        Ok(())
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
