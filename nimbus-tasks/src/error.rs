//! Task layer error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TaskError>;

/// Errors raised by the task manager and scheduler
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Schedule error: {0}")]
    Schedule(String),

    #[error("Execution error: {0}")]
    Execution(#[from] nimbus_execution::ExecutionError),

    #[error("Task not found: {0}")]
    NotFound(String),
}

impl From<serde_yaml::Error> for TaskError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Schedule(err.to_string())
    }
}
