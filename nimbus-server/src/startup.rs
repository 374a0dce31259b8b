//! Service wiring and lifecycle

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use nimbus_config::NimbusConfig;
use nimbus_execution::{CoordinationRegistry, Master, WorkerSpawnSpec};
use nimbus_registry::ProjectRegistry;
use nimbus_tasks::{TaskManager, TaskStore};

use crate::api::HttpApi;

/// The assembled service: one coordination registry passed by reference to
/// every component, components registered in strict startup order.
pub struct Service {
    pub registry: Arc<CoordinationRegistry>,
    pub projects: Arc<ProjectRegistry>,
    pub master: Arc<Master>,
    pub tasks: Arc<TaskManager>,
    pub api: Arc<HttpApi>,
}

impl Service {
    /// Build all components. `config_path` is forwarded to spawned worker
    /// processes so they resolve the same configuration.
    pub async fn build(config: NimbusConfig, config_path: Option<PathBuf>) -> Result<Self> {
        let mut worker_args = vec!["worker".to_string()];
        if let Some(ref path) = config_path {
            worker_args.push("--config".to_string());
            worker_args.push(path.display().to_string());
        }
        let spawn = WorkerSpawnSpec::current_exe(worker_args)?;

        let registry = Arc::new(CoordinationRegistry::new(spawn, config.execution.clone()));

        let projects = Arc::new(ProjectRegistry::new(
            config.projects.projects_dir.clone(),
            config.projects.default_entry_point.clone(),
        ));
        projects.scan_all().await?;

        let master = Arc::new(Master::new(registry.clone(), projects.clone(), config.clone()));

        let tasks = Arc::new(TaskManager::new(
            master.clone(),
            registry.clone(),
            TaskStore::new(config.tasks.tasks_dir.clone()),
            config.tasks.clone(),
            config.scheduler.clone(),
        ));

        let api = Arc::new(HttpApi::new(
            config.server.clone(),
            master.clone(),
            tasks.clone(),
            projects.clone(),
            registry.clone(),
        ));

        // Strict registration order; later lookups may rely on it
        registry.register_component(projects.clone()).await?;
        registry.register_component(master.clone()).await?;
        registry.register_component(api.clone()).await?;
        registry.register_component(tasks.clone()).await?;

        Ok(Self {
            registry,
            projects,
            master,
            tasks,
            api,
        })
    }

    /// Start everything: master (API layer + project fan-out) then the
    /// task layer.
    pub async fn start(&self) -> Result<()> {
        self.master.start(self.api.clone()).await?;
        self.tasks.start().await?;
        Ok(())
    }

    /// Stop everything; every step runs even when an earlier one fails
    pub async fn shutdown(&self) {
        self.tasks.shutdown().await;
        self.master.stop().await;
    }

    /// Start, block until a shutdown signal, then stop
    pub async fn run_until_shutdown(self) -> Result<()> {
        self.start().await?;
        shutdown_signal().await;
        self.shutdown().await;
        Ok(())
    }
}

/// Graceful shutdown signal: ctrl-c or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}
