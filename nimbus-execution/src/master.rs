//! Master: service startup/shutdown sequencing and synchronous dispatch

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use nimbus_config::NimbusConfig;
use nimbus_registry::ProjectRegistry;

use crate::coordination::{Component, CoordinationRegistry};
use crate::error::ExecutionError;

/// The API-surface collaborator. The core never calls into route-handling
/// code; it only starts/stops the layer and polls readiness.
#[async_trait]
pub trait ApiLayer: Send + Sync {
    async fn start(&self) -> Result<(), ExecutionError>;
    async fn stop(&self);
    fn is_ready(&self) -> bool;
}

/// Lifecycle state of the master
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterState {
    Created,
    Initializing,
    Running,
    Stopped,
}

/// Control-plane entry point: supervises project workers and dispatches
/// synchronous invocations.
pub struct Master {
    registry: Arc<CoordinationRegistry>,
    projects: Arc<ProjectRegistry>,
    config: NimbusConfig,
    state: RwLock<MasterState>,
    api: RwLock<Option<Arc<dyn ApiLayer>>>,
}

impl Component for Master {
    fn name(&self) -> &'static str {
        "master"
    }
}

impl Master {
    pub fn new(registry: Arc<CoordinationRegistry>, projects: Arc<ProjectRegistry>, config: NimbusConfig) -> Self {
        Self {
            registry,
            projects,
            config,
            state: RwLock::new(MasterState::Created),
            api: RwLock::new(None),
        }
    }

    pub async fn state(&self) -> MasterState {
        *self.state.read().await
    }

    /// Start the service: API layer first (bounded readiness wait, failure
    /// aborts startup), then a best-effort fan-out over every discovered
    /// project. Per-project failures are aggregated and logged once; one
    /// broken project never blocks the rest.
    pub async fn start(&self, api: Arc<dyn ApiLayer>) -> Result<(), ExecutionError> {
        *self.state.write().await = MasterState::Initializing;
        info!("Starting master");

        if let Err(e) = self.start_api_layer(api).await {
            error!("API layer failed to start: {}", e);
            self.stop().await;
            return Err(e);
        }

        let ready_timeout = self.config.execution.worker_ready_timeout;
        let mut failed = Vec::new();
        for project in self.projects.project_names().await {
            if !self.registry.start_project_process(&project).await {
                failed.push(project);
                continue;
            }
            if !self.registry.wait_for_ready(&project, ready_timeout).await {
                warn!("Project {} did not become ready within {:?}", project, ready_timeout);
                failed.push(project);
            }
        }

        if !failed.is_empty() {
            error!(
                "{} project(s) failed to start: {}",
                failed.len(),
                failed.join(", ")
            );
        }

        *self.state.write().await = MasterState::Running;
        info!("Master running");
        Ok(())
    }

    async fn start_api_layer(&self, api: Arc<dyn ApiLayer>) -> Result<(), ExecutionError> {
        api.start().await?;

        let timeout = self.config.server.api_ready_timeout;
        let deadline = tokio::time::Instant::now() + timeout;
        while !api.is_ready() {
            if tokio::time::Instant::now() >= deadline {
                return Err(ExecutionError::Timeout(format!(
                    "API layer not ready within {:?}",
                    timeout
                )));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        *self.api.write().await = Some(api);
        info!("API layer ready");
        Ok(())
    }

    /// Stop the service. Every step is independently caught so a failure in
    /// one cannot prevent the others; the final state is always `Stopped`.
    pub async fn stop(&self) {
        info!("Stopping master");

        for project in self.registry.worker_projects().await {
            self.registry.terminate_process(&project).await;
        }

        if let Some(api) = self.api.write().await.take() {
            api.stop().await;
        }

        self.registry.cleanup_resources().await;

        *self.state.write().await = MasterState::Stopped;
        info!("Master stopped");
    }

    /// Ensure a live worker for the project, then send one execute command
    /// and block for the reply.
    ///
    /// A missing or dead worker triggers exactly one cleanup-and-restart
    /// attempt before giving up with `ProjectUnavailable`. A worker that
    /// dies mid-call is cleaned up (the next invocation restarts it) and
    /// the death is surfaced to this caller rather than retried.
    pub async fn execute_function(
        &self,
        project: &str,
        function: &str,
        payload: JsonValue,
    ) -> Result<JsonValue, ExecutionError> {
        if !self.registry.check_process_status(project).await {
            self.restart_worker(project).await?;
        }

        let handle = self
            .registry
            .worker(project)
            .await
            .ok_or_else(|| ExecutionError::ProjectUnavailable(project.to_string()))?;

        let result = handle
            .execute(
                function,
                payload,
                self.config.execution.response_poll_interval,
                self.config.execution.execute_timeout,
            )
            .await;

        if let Err(ExecutionError::WorkerDied(_)) = &result {
            warn!("Worker for {} died during execution, cleaning up", project);
            self.registry.cleanup_project(project).await;
        }

        result
    }

    async fn restart_worker(&self, project: &str) -> Result<(), ExecutionError> {
        if self.registry.worker(project).await.is_some() {
            warn!("Worker for {} is not live, restarting", project);
            self.registry.cleanup_project(project).await;
        }

        if !self.registry.start_project_process(project).await {
            return Err(ExecutionError::ProjectUnavailable(project.to_string()));
        }

        let ready_timeout = self.config.execution.worker_ready_timeout;
        if !self.registry.wait_for_ready(project, ready_timeout).await {
            self.registry.terminate_process(project).await;
            return Err(ExecutionError::ProjectUnavailable(project.to_string()));
        }

        Ok(())
    }
}
