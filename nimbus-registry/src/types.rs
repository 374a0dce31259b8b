//! Project and function data model

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Manifest file every project directory must carry
pub const MANIFEST_FILE: &str = "project.yaml";

/// Calling convention of a function handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    /// Dispatched through the worker's bounded blocking pool
    #[default]
    Sync,
    /// Awaited directly on the worker's event loop
    Async,
}

/// Runtime declaration: how handler files in this project are invoked
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSpec {
    /// Interpreter argv prefix, e.g. `["python3"]`
    pub command: Vec<String>,

    /// File extension identifying function sources, e.g. `".py"`
    pub extension: String,

    /// Default calling convention for functions in this project
    #[serde(default)]
    pub kind: HandlerKind,
}

/// Per-function manifest override
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FunctionOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<HandlerKind>,
}

/// Parsed `project.yaml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectManifest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub runtime: RuntimeSpec,

    /// Setup argv lists run by the provisioner, in order, cwd = project root
    #[serde(default)]
    pub setup: Vec<Vec<String>>,

    /// Per-function overrides keyed by function name
    #[serde(default)]
    pub functions: HashMap<String, FunctionOverride>,

    /// Project env document, relative to the project root
    #[serde(default = "default_env_file")]
    pub env_file: String,
}

fn default_env_file() -> String {
    ".env".to_string()
}

/// A discovered project: a named deployment unit rooted at a directory
#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    pub root: PathBuf,
    pub manifest: ProjectManifest,
}

impl Project {
    /// Absolute path of the project's env document, if one is declared
    pub fn env_file_path(&self) -> PathBuf {
        self.root.join(&self.manifest.env_file)
    }
}

/// Load status of a function within its owning worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
    /// Declared in the manifest but its source file was not found
    Unregistered,
    /// Source file discovered; handler not yet resolved
    Registered,
    /// Handler resolved and callable
    Loaded,
}

/// A function entry: `(project, name)` is the unique key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub project: String,
    pub name: String,
    pub source: PathBuf,
    pub entry: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub kind: HandlerKind,
    pub status: LoadStatus,
}
