//! Task record and status model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Created,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Active tasks block creation of a duplicate for the same
    /// `(project, function)` pair
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Created | TaskStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Created => "created",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "created" => Ok(TaskStatus::Created),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// One trackable asynchronous invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub project_name: String,
    pub function_name: String,
    pub payload: JsonValue,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub result: Option<JsonValue>,
    pub error: Option<String>,
}

impl TaskRecord {
    pub fn new(project_name: impl Into<String>, function_name: impl Into<String>, payload: JsonValue) -> Self {
        let project_name = project_name.into();
        let function_name = function_name.into();
        let now = Utc::now();
        Self {
            task_id: generate_task_id(&project_name, &function_name),
            project_name,
            function_name,
            payload,
            status: TaskStatus::Created,
            created_at: now,
            updated_at: now,
            result: None,
            error: None,
        }
    }

    /// Move to a new status, touching `updated_at`
    pub fn transition(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Task ids carry a readable `project_function_` prefix ahead of the UUID,
/// so listings and on-disk records group naturally.
pub fn generate_task_id(project: &str, function: &str) -> String {
    format!("{}_{}_{}", project, function, Uuid::new_v4())
}
