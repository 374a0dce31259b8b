//! Environment provisioning and per-project env maps

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{RegistryError, Result};
use crate::types::Project;

/// Seam to the external environment provisioner.
///
/// The core only needs a readiness/failure signal for a project's isolated
/// runtime environment; package resolution details stay behind this trait.
#[async_trait]
pub trait EnvironmentProvisioner: Send + Sync {
    /// Ensure the project's environment exists and is usable
    async fn ensure_environment(&self, project: &Project) -> Result<()>;

    /// Install the project's declared dependencies
    async fn install_dependencies(&self, project: &Project) -> Result<()>;
}

/// Provisioner that runs the manifest's `setup:` argv lists with the
/// project root as working directory. An empty setup list means the
/// environment is trivially ready.
pub struct SetupCommandProvisioner;

#[async_trait]
impl EnvironmentProvisioner for SetupCommandProvisioner {
    async fn ensure_environment(&self, project: &Project) -> Result<()> {
        if !tokio::fs::try_exists(&project.root).await? {
            return Err(RegistryError::Provisioning {
                project: project.name.clone(),
                message: format!("project directory missing: {}", project.root.display()),
            });
        }
        Ok(())
    }

    async fn install_dependencies(&self, project: &Project) -> Result<()> {
        if project.manifest.setup.is_empty() {
            debug!("No setup commands for project {}", project.name);
            return Ok(());
        }

        for argv in &project.manifest.setup {
            let Some((program, args)) = argv.split_first() else {
                return Err(RegistryError::Provisioning {
                    project: project.name.clone(),
                    message: "empty setup command".to_string(),
                });
            };

            info!("Running setup for project {}: {:?}", project.name, argv);
            let output = Command::new(program)
                .args(args)
                .current_dir(&project.root)
                .output()
                .await
                .map_err(|e| RegistryError::Provisioning {
                    project: project.name.clone(),
                    message: format!("failed to run {:?}: {}", argv, e),
                })?;

            if !output.status.success() {
                return Err(RegistryError::Provisioning {
                    project: project.name.clone(),
                    message: format!(
                        "setup command {:?} exited with {}: {}",
                        argv,
                        output.status,
                        String::from_utf8_lossy(&output.stderr).trim()
                    ),
                });
            }
        }

        info!("Dependencies installed for project {}", project.name);
        Ok(())
    }
}

/// Build the immutable env map for a project: the system env document
/// first, then the project's own `.env` overriding key by key. The process
/// environment is never touched.
pub fn project_env(project: &Project, system_env_file: Option<&Path>) -> Result<HashMap<String, String>> {
    let mut env = HashMap::new();

    if let Some(path) = system_env_file {
        merge_env_file(&mut env, path)?;
    }
    merge_env_file(&mut env, &project.env_file_path())?;

    debug!("Loaded {} env entries for project {}", env.len(), project.name);
    Ok(env)
}

fn merge_env_file(env: &mut HashMap<String, String>, path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    for item in dotenvy::from_path_iter(path).map_err(|e| RegistryError::EnvFile(e.to_string()))? {
        let (key, value) = item.map_err(|e| RegistryError::EnvFile(e.to_string()))?;
        env.insert(key, value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProjectManifest, RuntimeSpec};

    fn project_with_root(root: std::path::PathBuf) -> Project {
        Project {
            name: "demo".to_string(),
            root,
            manifest: ProjectManifest {
                description: None,
                runtime: RuntimeSpec {
                    command: vec!["sh".to_string()],
                    extension: ".sh".to_string(),
                    kind: Default::default(),
                },
                setup: Vec::new(),
                functions: Default::default(),
                env_file: ".env".to_string(),
            },
        }
    }

    #[test]
    fn test_project_env_overrides_system_env() {
        let dir = tempfile::tempdir().unwrap();
        let system = dir.path().join("system.env");
        std::fs::write(&system, "SHARED=system\nONLY_SYSTEM=1\n").unwrap();

        let root = dir.path().join("demo");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join(".env"), "SHARED=project\nONLY_PROJECT=1\n").unwrap();

        let env = project_env(&project_with_root(root), Some(&system)).unwrap();
        assert_eq!(env["SHARED"], "project");
        assert_eq!(env["ONLY_SYSTEM"], "1");
        assert_eq!(env["ONLY_PROJECT"], "1");
    }

    #[test]
    fn test_project_env_missing_files_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("demo");
        std::fs::create_dir_all(&root).unwrap();

        let env = project_env(&project_with_root(root), None).unwrap();
        assert!(env.is_empty());
    }

    #[tokio::test]
    async fn test_setup_provisioner_runs_commands() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("demo");
        std::fs::create_dir_all(&root).unwrap();

        let mut project = project_with_root(root.clone());
        project.manifest.setup = vec![vec![
            "touch".to_string(),
            "installed.marker".to_string(),
        ]];

        let provisioner = SetupCommandProvisioner;
        provisioner.ensure_environment(&project).await.unwrap();
        provisioner.install_dependencies(&project).await.unwrap();

        assert!(root.join("installed.marker").exists());
    }

    #[tokio::test]
    async fn test_setup_provisioner_surfaces_failures() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("demo");
        std::fs::create_dir_all(&root).unwrap();

        let mut project = project_with_root(root);
        project.manifest.setup = vec![vec!["false".to_string()]];

        let provisioner = SetupCommandProvisioner;
        let result = provisioner.install_dependencies(&project).await;
        assert!(matches!(result, Err(RegistryError::Provisioning { .. })));
    }
}
