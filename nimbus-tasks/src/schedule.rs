//! Declarative schedule document
//!
//! Read once at task-manager startup; never mutated at runtime. Each job
//! binds a cron expression to a `(project, function, args)` tuple.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::Result;

/// One cron-triggered job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub project: String,
    pub function: String,
    /// Six-field cron expression (seconds first)
    pub cron: String,
    /// Static payload passed to every firing
    #[serde(default)]
    pub args: JsonValue,
}

/// The whole schedule document: job id -> job
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScheduleDocument {
    #[serde(default)]
    pub jobs: BTreeMap<String, ScheduledJob>,
}

impl ScheduleDocument {
    /// Parse a YAML schedule document
    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Read and parse the document at `path`
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }
}
