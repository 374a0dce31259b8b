//! Domain-specific configuration modules

pub mod execution;
pub mod logging;
pub mod projects;
pub mod scheduler;
pub mod server;
pub mod tasks;
pub mod utils;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main Nimbus configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NimbusConfig {
    /// API server configuration
    #[serde(default)]
    pub server: server::ServerConfig,

    /// Worker/function execution configuration
    #[serde(default)]
    pub execution: execution::ExecutionConfig,

    /// Project discovery configuration
    #[serde(default)]
    pub projects: projects::ProjectsConfig,

    /// Task manager configuration
    #[serde(default)]
    pub tasks: tasks::TaskConfig,

    /// Cron scheduler configuration
    #[serde(default)]
    pub scheduler: scheduler::SchedulerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,
}

impl NimbusConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.server.validate()?;
        self.execution.validate()?;
        self.projects.validate()?;
        self.tasks.validate()?;
        self.scheduler.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = NimbusConfig::default();
        serde_yaml::to_string(&config).unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = NimbusConfig::default();
        assert!(config.validate_all().is_ok());
    }

    #[test]
    fn test_sample_config_round_trips() {
        let sample = NimbusConfig::generate_sample();
        let parsed: NimbusConfig = serde_yaml::from_str(&sample).unwrap();
        assert!(parsed.validate_all().is_ok());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let yaml = r#"
server:
  port: 9000
"#;
        let config: NimbusConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.projects.projects_dir, std::path::PathBuf::from("projects"));
    }
}
