//! Cron scheduler configuration

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Cron scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Whether the scheduler runs at all
    #[serde(default = "crate::domains::utils::default_true")]
    pub enabled: bool,

    /// Declarative schedule document, read once at task-manager startup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_file: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule_file: None,
        }
    }
}

impl Validatable for SchedulerConfig {
    fn validate(&self) -> ConfigResult<()> {
        if let Some(ref path) = self.schedule_file {
            if path.as_os_str().is_empty() {
                return Err(self.validation_error("schedule_file cannot be empty when set"));
            }
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "scheduler"
    }
}
