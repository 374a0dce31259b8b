//! Error types for the execution core

use thiserror::Error;

/// Execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The project has no live worker and a restart attempt did not help
    #[error("Project unavailable: {0}")]
    ProjectUnavailable(String),

    #[error("Function {function} not found in project {project}")]
    FunctionNotFound { project: String, function: String },

    /// The handler raised; the message is the worker-reported error verbatim
    #[error("Function execution failed: {0}")]
    FunctionFailed(String),

    /// The worker process died while an invocation was outstanding
    #[error("Worker for project {0} died during execution")]
    WorkerDied(String),

    #[error("Worker error: {0}")]
    WorkerError(String),

    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("Registry error: {0}")]
    RegistryError(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

impl From<nimbus_ipc::IpcError> for ExecutionError {
    fn from(err: nimbus_ipc::IpcError) -> Self {
        Self::IpcError(err.to_string())
    }
}

impl From<nimbus_registry::RegistryError> for ExecutionError {
    fn from(err: nimbus_registry::RegistryError) -> Self {
        Self::RegistryError(err.to_string())
    }
}

impl From<nimbus_config::ConfigError> for ExecutionError {
    fn from(err: nimbus_config::ConfigError) -> Self {
        Self::ConfigurationError(err.to_string())
    }
}
