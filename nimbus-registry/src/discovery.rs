//! Filesystem discovery of projects and their function files

use std::path::Path;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{RegistryError, Result};
use crate::types::{FunctionSpec, LoadStatus, Project, ProjectManifest, MANIFEST_FILE};

/// Discover every project under `projects_dir`.
///
/// A missing projects directory is a configuration error (fail fast).
/// Subdirectories without a readable manifest are skipped with a warning;
/// one broken project must not block discovery of the rest.
pub async fn discover_projects(projects_dir: &Path) -> Result<Vec<Project>> {
    if !fs::try_exists(projects_dir).await? {
        return Err(RegistryError::Configuration(format!(
            "projects directory does not exist: {}",
            projects_dir.display()
        )));
    }

    let mut projects = Vec::new();
    let mut entries = fs::read_dir(projects_dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.metadata().await?.is_dir() {
            continue;
        }

        let root = entry.path();
        match load_project(&root).await {
            Ok(project) => {
                debug!("Discovered project {} at {}", project.name, root.display());
                projects.push(project);
            }
            Err(e) => {
                warn!("Skipping directory {}: {}", root.display(), e);
            }
        }
    }

    projects.sort_by(|a, b| a.name.cmp(&b.name));
    info!("Discovered {} projects under {}", projects.len(), projects_dir.display());
    Ok(projects)
}

/// Load a single project from its root directory
pub async fn load_project(root: &Path) -> Result<Project> {
    let name = root
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| RegistryError::Configuration(format!("invalid project path: {}", root.display())))?
        .to_string();

    let manifest_path = root.join(MANIFEST_FILE);
    let content = fs::read_to_string(&manifest_path).await.map_err(|e| RegistryError::Manifest {
        project: name.clone(),
        message: format!("cannot read {}: {}", MANIFEST_FILE, e),
    })?;

    let manifest: ProjectManifest = serde_yaml::from_str(&content).map_err(|e| RegistryError::Manifest {
        project: name.clone(),
        message: e.to_string(),
    })?;

    if manifest.runtime.command.is_empty() {
        return Err(RegistryError::Manifest {
            project: name,
            message: "runtime.command cannot be empty".to_string(),
        });
    }

    Ok(Project {
        name,
        root: root.to_path_buf(),
        manifest,
    })
}

/// Scan a project directory for function sources.
///
/// Every file matching the runtime extension becomes a registered function
/// named after its stem; `_`- and `test_`-prefixed files are skipped.
/// Manifest overrides supply entry points and descriptions; an override
/// whose source file is missing is recorded as unregistered so the gap
/// shows up in listings instead of disappearing.
pub async fn scan_functions(project: &Project, default_entry: &str) -> Result<Vec<FunctionSpec>> {
    let extension = project.manifest.runtime.extension.trim_start_matches('.');
    let mut functions = Vec::new();
    let mut entries = fs::read_dir(&project.root).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.metadata().await?.is_file() {
            continue;
        }

        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let matches_ext = path.extension().and_then(|e| e.to_str()) == Some(extension);
        if !matches_ext || stem.starts_with('_') || stem.starts_with("test_") {
            continue;
        }

        let over = project.manifest.functions.get(stem);
        functions.push(FunctionSpec {
            project: project.name.clone(),
            name: stem.to_string(),
            source: path,
            entry: over
                .and_then(|o| o.entry.clone())
                .unwrap_or_else(|| default_entry.to_string()),
            description: over.and_then(|o| o.description.clone()),
            kind: over
                .and_then(|o| o.kind)
                .unwrap_or(project.manifest.runtime.kind),
            status: LoadStatus::Registered,
        });
    }

    // Manifest-declared functions whose source never showed up
    for (name, over) in &project.manifest.functions {
        if functions.iter().any(|f| &f.name == name) {
            continue;
        }
        warn!(
            "Function {} declared in {} manifest has no source file",
            name, project.name
        );
        functions.push(FunctionSpec {
            project: project.name.clone(),
            name: name.clone(),
            source: project
                .root
                .join(format!("{}.{}", name, extension)),
            entry: over.entry.clone().unwrap_or_else(|| default_entry.to_string()),
            description: over.description.clone(),
            kind: over.kind.unwrap_or(project.manifest.runtime.kind),
            status: LoadStatus::Unregistered,
        });
    }

    functions.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(functions)
}
