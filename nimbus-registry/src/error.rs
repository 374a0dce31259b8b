//! Registry error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors raised during project discovery and bookkeeping
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown project: {0}")]
    UnknownProject(String),

    #[error("Unknown function {function} in project {project}")]
    UnknownFunction { project: String, function: String },

    #[error("Invalid manifest for project {project}: {message}")]
    Manifest { project: String, message: String },

    #[error("Provisioning failed for project {project}: {message}")]
    Provisioning { project: String, message: String },

    #[error("Environment file error: {0}")]
    EnvFile(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
