//! Read-only function projection and deploy bookkeeping
//!
//! Workers own the functions they load; this registry holds the
//! control-plane projection used for listings, deploys, and deletes.

use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::info;

use crate::discovery::{discover_projects, load_project, scan_functions};
use crate::error::{RegistryError, Result};
use crate::types::{FunctionSpec, Project};

/// Summary row returned by project listings
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProjectSummary {
    pub name: String,
    pub path: PathBuf,
    pub function_count: usize,
}

struct ProjectEntry {
    project: Project,
    functions: HashMap<String, FunctionSpec>,
}

/// Control-plane registry of discovered projects and their functions
pub struct ProjectRegistry {
    projects_dir: PathBuf,
    default_entry: String,
    inner: RwLock<HashMap<String, ProjectEntry>>,
}

impl ProjectRegistry {
    pub fn new(projects_dir: PathBuf, default_entry: String) -> Self {
        Self {
            projects_dir,
            default_entry,
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Discover all projects and scan their functions
    pub async fn scan_all(&self) -> Result<()> {
        let projects = discover_projects(&self.projects_dir).await?;
        let mut inner = self.inner.write().await;
        inner.clear();

        for project in projects {
            let functions = scan_functions(&project, &self.default_entry).await?;
            let functions = functions.into_iter().map(|f| (f.name.clone(), f)).collect();
            inner.insert(project.name.clone(), ProjectEntry { project, functions });
        }

        Ok(())
    }

    /// Names of every known project, sorted
    pub async fn project_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.inner.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Look up a project by name
    pub async fn get_project(&self, name: &str) -> Option<Project> {
        self.inner.read().await.get(name).map(|e| e.project.clone())
    }

    /// Look up one function's spec
    pub async fn get_function(&self, project: &str, function: &str) -> Option<FunctionSpec> {
        self.inner
            .read()
            .await
            .get(project)
            .and_then(|e| e.functions.get(function).cloned())
    }

    /// Whether `(project, function)` exists in the projection
    pub async fn exists(&self, project: &str, function: &str) -> bool {
        self.get_function(project, function).await.is_some()
    }

    /// List all projects with their function counts
    pub async fn list_projects(&self) -> Vec<ProjectSummary> {
        let inner = self.inner.read().await;
        let mut summaries: Vec<_> = inner
            .values()
            .map(|e| ProjectSummary {
                name: e.project.name.clone(),
                path: e.project.root.clone(),
                function_count: e.functions.len(),
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// List a project's functions; unknown project fails fast
    pub async fn list_functions(&self, project: &str) -> Result<Vec<FunctionSpec>> {
        let inner = self.inner.read().await;
        let entry = inner
            .get(project)
            .ok_or_else(|| RegistryError::UnknownProject(project.to_string()))?;

        let mut functions: Vec<_> = entry.functions.values().cloned().collect();
        functions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(functions)
    }

    /// Re-read a project's manifest and rescan its functions (deploy or
    /// redeploy). The caller restarts the project's worker afterwards.
    pub async fn deploy_project(&self, name: &str) -> Result<Project> {
        let root = self.projects_dir.join(name);
        let project = load_project(&root).await?;
        let functions = scan_functions(&project, &self.default_entry).await?;

        let mut inner = self.inner.write().await;
        inner.insert(
            name.to_string(),
            ProjectEntry {
                project: project.clone(),
                functions: functions.into_iter().map(|f| (f.name.clone(), f)).collect(),
            },
        );

        info!("Project {} deployed", name);
        Ok(project)
    }

    /// Remove a project: its directory on disk and the projection entry.
    /// The caller terminates the project's worker first.
    pub async fn remove_project(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .remove(name)
            .ok_or_else(|| RegistryError::UnknownProject(name.to_string()))?;

        tokio::fs::remove_dir_all(&entry.project.root).await?;
        info!("Project {} deleted", name);
        Ok(())
    }

    /// Remove one function: its source file and the projection entry
    pub async fn remove_function(&self, project: &str, function: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .get_mut(project)
            .ok_or_else(|| RegistryError::UnknownProject(project.to_string()))?;

        let spec = entry
            .functions
            .remove(function)
            .ok_or_else(|| RegistryError::UnknownFunction {
                project: project.to_string(),
                function: function.to_string(),
            })?;

        if tokio::fs::try_exists(&spec.source).await? {
            tokio::fs::remove_file(&spec.source).await?;
        }

        info!("Function {} removed from project {}", function, project);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MANIFEST_FILE;

    const SH_MANIFEST: &str = "runtime:\n  command: [\"sh\"]\n  extension: \".sh\"\n";

    fn seed_project(dir: &std::path::Path, name: &str, functions: &[&str]) {
        let root = dir.join(name);
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join(MANIFEST_FILE), SH_MANIFEST).unwrap();
        for f in functions {
            std::fs::write(root.join(format!("{}.sh", f)), "cat\n").unwrap();
        }
    }

    #[tokio::test]
    async fn test_scan_all_and_listings() {
        let dir = tempfile::tempdir().unwrap();
        seed_project(dir.path(), "alpha", &["echo", "reverse"]);
        seed_project(dir.path(), "beta", &["report"]);

        let registry = ProjectRegistry::new(dir.path().to_path_buf(), "main".to_string());
        registry.scan_all().await.unwrap();

        assert_eq!(registry.project_names().await, vec!["alpha", "beta"]);
        let summaries = registry.list_projects().await;
        assert_eq!(summaries[0].function_count, 2);
        assert!(registry.exists("alpha", "echo").await);
        assert!(!registry.exists("alpha", "report").await);
    }

    #[tokio::test]
    async fn test_unknown_project_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ProjectRegistry::new(dir.path().to_path_buf(), "main".to_string());

        let result = registry.list_functions("ghost").await;
        assert!(matches!(result, Err(RegistryError::UnknownProject(_))));
    }

    #[tokio::test]
    async fn test_deploy_picks_up_new_functions() {
        let dir = tempfile::tempdir().unwrap();
        seed_project(dir.path(), "alpha", &["echo"]);

        let registry = ProjectRegistry::new(dir.path().to_path_buf(), "main".to_string());
        registry.scan_all().await.unwrap();
        assert!(!registry.exists("alpha", "added").await);

        std::fs::write(dir.path().join("alpha").join("added.sh"), "cat\n").unwrap();
        registry.deploy_project("alpha").await.unwrap();
        assert!(registry.exists("alpha", "added").await);
    }

    #[tokio::test]
    async fn test_remove_function_deletes_source() {
        let dir = tempfile::tempdir().unwrap();
        seed_project(dir.path(), "alpha", &["echo", "gone"]);

        let registry = ProjectRegistry::new(dir.path().to_path_buf(), "main".to_string());
        registry.scan_all().await.unwrap();

        registry.remove_function("alpha", "gone").await.unwrap();
        assert!(!dir.path().join("alpha").join("gone.sh").exists());
        assert!(!registry.exists("alpha", "gone").await);

        let result = registry.remove_function("alpha", "gone").await;
        assert!(matches!(result, Err(RegistryError::UnknownFunction { .. })));
    }
}
