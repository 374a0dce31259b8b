//! Task manager configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Task manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Directory holding one JSON record per task
    #[serde(default = "default_tasks_dir")]
    pub tasks_dir: PathBuf,

    /// Persisted records older than this many days are swept
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// How often the background sweep runs
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_sweep_interval")]
    pub sweep_interval: Duration,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            tasks_dir: default_tasks_dir(),
            retention_days: default_retention_days(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

impl Validatable for TaskConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.tasks_dir.as_os_str().is_empty() {
            return Err(self.validation_error("tasks_dir cannot be empty"));
        }
        validate_positive(self.retention_days, "retention_days", self.domain_name())?;
        validate_positive(self.sweep_interval.as_secs(), "sweep_interval", self.domain_name())?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "tasks"
    }
}

fn default_tasks_dir() -> PathBuf {
    PathBuf::from("tasks")
}

fn default_retention_days() -> u32 {
    7
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(6 * 3600)
}
