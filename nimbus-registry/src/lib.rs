//! Project and function discovery for Nimbus
//!
//! A project is a directory under the configured projects root carrying a
//! `project.yaml` manifest. This crate discovers projects, scans their
//! function files, keeps the read-only registry projection used for listing
//! and deploy bookkeeping, and owns the environment-provisioner seam.

pub mod discovery;
pub mod environment;
pub mod error;
pub mod registry;
pub mod types;

pub use discovery::{discover_projects, load_project, scan_functions};
pub use environment::{project_env, EnvironmentProvisioner, SetupCommandProvisioner};
pub use error::{RegistryError, Result};
pub use registry::{ProjectRegistry, ProjectSummary};
pub use types::{
    FunctionSpec, HandlerKind, LoadStatus, Project, ProjectManifest, RuntimeSpec, MANIFEST_FILE,
};
