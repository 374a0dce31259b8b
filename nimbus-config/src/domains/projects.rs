//! Project discovery configuration

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Project discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectsConfig {
    /// Directory containing one subdirectory per project
    #[serde(default = "default_projects_dir")]
    pub projects_dir: PathBuf,

    /// Optional system-wide env document merged under every project's env
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_env_file: Option<PathBuf>,

    /// Default entry point name when a function does not declare one
    #[serde(default = "default_entry_point")]
    pub default_entry_point: String,
}

impl Default for ProjectsConfig {
    fn default() -> Self {
        Self {
            projects_dir: default_projects_dir(),
            system_env_file: None,
            default_entry_point: default_entry_point(),
        }
    }
}

impl Validatable for ProjectsConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.projects_dir.as_os_str().is_empty() {
            return Err(self.validation_error("projects_dir cannot be empty"));
        }
        if self.default_entry_point.is_empty() {
            return Err(self.validation_error("default_entry_point cannot be empty"));
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "projects"
    }
}

fn default_projects_dir() -> PathBuf {
    PathBuf::from("projects")
}

fn default_entry_point() -> String {
    "main".to_string()
}
