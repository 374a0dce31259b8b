//! Process-wide coordination registry
//!
//! One explicitly constructed instance per process, passed by `Arc` to every
//! component at startup. Holds the named component slots, the live worker
//! handles with their IPC primitives, per-task cancel signals, and the
//! cached per-project sync dispatchers. No business logic lives here.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use nimbus_config::ExecutionConfig;
use nimbus_ipc::{ChildProcessTransport, IpcError, IpcTransport, MessageEnvelope, WorkerCommand, WorkerReply};

use crate::dispatch::SyncDispatcher;
use crate::error::ExecutionError;

/// The fixed set of component slot names; registering anything else is a
/// configuration error.
pub const COMPONENT_SLOTS: [&str; 5] = [
    "registry",
    "master",
    "project_manager",
    "api_server",
    "task_manager",
];

/// Marker trait for components registered in the coordination registry.
/// Collaborators keep their own typed `Arc`s; the registry only tracks
/// lifecycle so `cleanup_resources` can release everything in order.
pub trait Component: Send + Sync {
    fn name(&self) -> &'static str;
}

impl Component for nimbus_registry::ProjectRegistry {
    fn name(&self) -> &'static str {
        "project_manager"
    }
}

/// How worker processes are spawned: a program plus base arguments; the
/// registry appends `--project <name>` for each start.
#[derive(Debug, Clone)]
pub struct WorkerSpawnSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerSpawnSpec {
    /// Spawn workers through this same executable (the `worker` subcommand)
    pub fn current_exe(args: Vec<String>) -> Result<Self, ExecutionError> {
        let program = std::env::current_exe()
            .map_err(|e| ExecutionError::ConfigurationError(format!("cannot locate executable: {}", e)))?;
        Ok(Self { program, args })
    }
}

/// Handle to one running worker process: the OS child, its command
/// transport, and the latched readiness signal.
pub struct WorkerHandle {
    project: String,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    child: Mutex<tokio::process::Child>,
    transport: Mutex<ChildProcessTransport>,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
}

impl WorkerHandle {
    fn new(project: String, mut child: tokio::process::Child) -> Result<Self, ExecutionError> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExecutionError::WorkerError("worker stdin not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecutionError::WorkerError("worker stdout not piped".to_string()))?;

        let (ready_tx, ready_rx) = watch::channel(false);
        Ok(Self {
            project,
            pid: child.id(),
            started_at: Utc::now(),
            child: Mutex::new(child),
            transport: Mutex::new(ChildProcessTransport::new(stdin, stdout)),
            ready_tx,
            ready_rx,
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Whether the readiness signal has latched
    pub fn is_ready(&self) -> bool {
        *self.ready_rx.borrow()
    }

    /// Whether the OS process is still running
    pub async fn is_process_alive(&self) -> bool {
        match self.child.lock().await.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => false,
            Err(e) => {
                warn!("try_wait failed for worker {}: {}", self.project, e);
                false
            }
        }
    }

    /// Liveness: process alive AND readiness latched
    pub async fn is_live(&self) -> bool {
        self.is_ready() && self.is_process_alive().await
    }

    /// Block until the worker's one-shot ready frame arrives, latching the
    /// signal. Returns false when the bounded wait elapses first.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        if self.is_ready() {
            return true;
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let mut transport = self.transport.lock().await;
        if self.is_ready() {
            return true;
        }

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }

            match transport.receive_timeout::<WorkerReply>(remaining).await {
                Ok(envelope) => match envelope.message {
                    WorkerReply::Ready { functions, pid, .. } => {
                        debug!(
                            "Worker {} ready (pid {}, {} functions)",
                            self.project, pid, functions
                        );
                        let _ = self.ready_tx.send(true);
                        return true;
                    }
                    other => {
                        debug!("Discarding pre-ready frame from {}: {:?}", self.project, other);
                    }
                },
                Err(IpcError::Timeout) => return false,
                Err(e) => {
                    warn!("Readiness wait for {} failed: {}", self.project, e);
                    return false;
                }
            }
        }
    }

    /// Send one execute command and block for its reply.
    ///
    /// The transport lock is held for the whole exchange, so invocations on
    /// one worker are strictly serialized in send order. Every poll-interval
    /// tick without a reply re-checks process liveness, so a worker crash
    /// mid-call surfaces as an error instead of hanging forever. `deadline`
    /// of `None` waits indefinitely.
    pub async fn execute(
        &self,
        function_name: &str,
        payload: JsonValue,
        poll_interval: Duration,
        deadline: Option<Duration>,
    ) -> Result<JsonValue, ExecutionError> {
        let correlation_id = Uuid::new_v4();
        let started = tokio::time::Instant::now();

        let mut transport = self.transport.lock().await;
        transport
            .send(&MessageEnvelope::new(WorkerCommand::Execute {
                function_name: function_name.to_string(),
                payload,
                correlation_id,
            }))
            .await?;

        loop {
            match transport.receive_timeout::<WorkerReply>(poll_interval).await {
                Ok(envelope) => match envelope.message {
                    WorkerReply::Success {
                        correlation_id: id,
                        result,
                    } if id == correlation_id => return Ok(result),
                    WorkerReply::Error {
                        correlation_id: id,
                        error,
                    } if id == correlation_id => return Err(ExecutionError::FunctionFailed(error)),
                    stale => {
                        // Reply to an invocation that already gave up
                        debug!("Discarding stale reply from {}: {:?}", self.project, stale);
                    }
                },
                Err(IpcError::Timeout) => {
                    if !self.is_process_alive().await {
                        return Err(ExecutionError::WorkerDied(self.project.clone()));
                    }
                    if let Some(limit) = deadline {
                        if started.elapsed() >= limit {
                            return Err(ExecutionError::Timeout(format!(
                                "no reply from {}/{} within {:?}",
                                self.project, function_name, limit
                            )));
                        }
                    }
                }
                Err(IpcError::ConnectionClosed) => {
                    return Err(ExecutionError::WorkerDied(self.project.clone()));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Stop the worker: send the stop sentinel, join with a bounded wait,
    /// force-kill if it is still running afterwards.
    pub async fn terminate(&self, stop_timeout: Duration) {
        // try_lock: an in-flight invocation may hold the transport
        // indefinitely and termination must not wait behind it. The
        // bounded join below falls through to a kill either way.
        match self.transport.try_lock() {
            Ok(mut transport) => {
                if let Err(e) = transport.send(&MessageEnvelope::new(WorkerCommand::Stop)).await {
                    debug!("Stop command for {} not delivered: {}", self.project, e);
                }
                let _ = transport.close().await;
            }
            Err(_) => {
                debug!(
                    "Transport for {} busy, skipping stop command",
                    self.project
                );
            }
        }

        let mut child = self.child.lock().await;
        match tokio::time::timeout(stop_timeout, child.wait()).await {
            Ok(Ok(status)) => debug!("Worker {} exited with {}", self.project, status),
            Ok(Err(e)) => warn!("Waiting for worker {} failed: {}", self.project, e),
            Err(_) => {
                warn!(
                    "Worker {} did not exit within {:?}, killing",
                    self.project, stop_timeout
                );
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill worker {}: {}", self.project, e);
                }
            }
        }
    }
}

/// Process-wide coordination registry
pub struct CoordinationRegistry {
    spawn: WorkerSpawnSpec,
    config: ExecutionConfig,
    components: Mutex<HashMap<&'static str, Arc<dyn Component>>>,
    workers: RwLock<HashMap<String, Arc<WorkerHandle>>>,
    task_cancels: Mutex<HashMap<String, watch::Sender<bool>>>,
    dispatchers: Mutex<HashMap<String, Arc<SyncDispatcher>>>,
}

impl CoordinationRegistry {
    pub fn new(spawn: WorkerSpawnSpec, config: ExecutionConfig) -> Self {
        Self {
            spawn,
            config,
            components: Mutex::new(HashMap::new()),
            workers: RwLock::new(HashMap::new()),
            task_cancels: Mutex::new(HashMap::new()),
            dispatchers: Mutex::new(HashMap::new()),
        }
    }

    pub fn execution_config(&self) -> &ExecutionConfig {
        &self.config
    }

    // ---- component slots ----

    /// Register a component under one of the fixed slot names. Components
    /// are registered in a strict startup order; an unknown name is a
    /// configuration error.
    pub async fn register_component(&self, component: Arc<dyn Component>) -> Result<(), ExecutionError> {
        let name = component.name();
        let slot = COMPONENT_SLOTS
            .iter()
            .copied()
            .find(|s| *s == name)
            .ok_or_else(|| ExecutionError::ConfigurationError(format!("unknown component slot: {}", name)))?;

        let mut components = self.components.lock().await;
        if components.insert(slot, component).is_some() {
            warn!("Component slot {} re-registered", slot);
        }
        debug!("Component {} registered", slot);
        Ok(())
    }

    /// Fetch a component; an empty slot is absent, never an error
    pub async fn get_component(&self, name: &str) -> Option<Arc<dyn Component>> {
        self.components.lock().await.get(name).cloned()
    }

    // ---- worker lifecycle ----

    /// Start the worker process for a project.
    ///
    /// No-op success when a live handle already exists; a dead handle is
    /// cleaned up first. Failures are logged and reported as `false`, never
    /// raised.
    pub async fn start_project_process(&self, project: &str) -> bool {
        if let Some(handle) = self.worker(project).await {
            if handle.is_process_alive().await {
                debug!("Worker for {} already running", project);
                return true;
            }
            warn!("Worker for {} is dead, cleaning up before restart", project);
            self.cleanup_project(project).await;
        }

        let child = tokio::process::Command::new(&self.spawn.program)
            .args(&self.spawn.args)
            .arg("--project")
            .arg(project)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to spawn worker for {}: {}", project, e);
                return false;
            }
        };

        match WorkerHandle::new(project.to_string(), child) {
            Ok(handle) => {
                info!("Started worker for {} (pid {:?})", project, handle.pid());
                self.workers
                    .write()
                    .await
                    .insert(project.to_string(), Arc::new(handle));
                true
            }
            Err(e) => {
                error!("Failed to set up worker handle for {}: {}", project, e);
                false
            }
        }
    }

    /// Handle for a project's worker, if one is recorded
    pub async fn worker(&self, project: &str) -> Option<Arc<WorkerHandle>> {
        self.workers.read().await.get(project).cloned()
    }

    /// Projects with a recorded worker handle
    pub async fn worker_projects(&self) -> Vec<String> {
        self.workers.read().await.keys().cloned().collect()
    }

    /// Block until the project's worker signals ready (bounded)
    pub async fn wait_for_ready(&self, project: &str, timeout: Duration) -> bool {
        match self.worker(project).await {
            Some(handle) => handle.wait_ready(timeout).await,
            None => false,
        }
    }

    /// Liveness as the master sees it: process alive and readiness latched
    pub async fn check_process_status(&self, project: &str) -> bool {
        match self.worker(project).await {
            Some(handle) => handle.is_live().await,
            None => false,
        }
    }

    /// Stop a project's worker and drop its bookkeeping. Terminating an
    /// unknown project is a logged no-op.
    pub async fn terminate_process(&self, project: &str) {
        let Some(handle) = self.worker(project).await else {
            info!("terminate_process: no worker recorded for {}", project);
            return;
        };

        handle.terminate(self.config.worker_stop_timeout).await;
        self.cleanup_project(project).await;
        info!("Worker for {} terminated", project);
    }

    /// Release a project's handle and cached dispatcher; safe to call
    /// multiple times.
    pub async fn cleanup_project(&self, project: &str) {
        self.workers.write().await.remove(project);
        self.dispatchers.lock().await.remove(project);
    }

    // ---- per-task signals ----

    /// Create the latched cancel signal for a task
    pub async fn create_task_signals(&self, task_id: &str) {
        let (tx, _rx) = watch::channel(false);
        self.task_cancels.lock().await.insert(task_id.to_string(), tx);
    }

    /// Latch a task's cancel signal; false when the task has no signal
    pub async fn signal_task_cancel(&self, task_id: &str) -> bool {
        match self.task_cancels.lock().await.get(task_id) {
            Some(tx) => {
                let _ = tx.send(true);
                true
            }
            None => false,
        }
    }

    /// Whether a task's cancel signal has latched
    pub async fn task_cancelled(&self, task_id: &str) -> bool {
        self.task_cancels
            .lock()
            .await
            .get(task_id)
            .map(|tx| *tx.borrow())
            .unwrap_or(false)
    }

    /// Release a task's signal; safe to call multiple times
    pub async fn cleanup_task_resources(&self, task_id: &str) {
        self.task_cancels.lock().await.remove(task_id);
    }

    // ---- dispatchers ----

    /// Lazily created, cached per-project dispatcher for sync handler bodies
    pub async fn dispatcher(&self, project: &str) -> Arc<SyncDispatcher> {
        let mut dispatchers = self.dispatchers.lock().await;
        dispatchers
            .entry(project.to_string())
            .or_insert_with(|| Arc::new(SyncDispatcher::new(self.config.max_sync_dispatch)))
            .clone()
    }

    // ---- full shutdown ----

    /// Full shutdown. Workers are stopped before shared primitives are
    /// released, and components go last, so no worker can block on a
    /// primitive that is already gone. Every step is logged; none aborts
    /// the rest.
    pub async fn cleanup_resources(&self) {
        let projects = self.worker_projects().await;
        for project in projects {
            if let Some(handle) = self.worker(&project).await {
                handle.terminate(self.config.worker_stop_timeout).await;
            }
            self.cleanup_project(&project).await;
        }

        let drained = self.task_cancels.lock().await.drain().count();
        if drained > 0 {
            debug!("Released {} task signals", drained);
        }
        self.dispatchers.lock().await.clear();
        self.components.lock().await.clear();
        info!("Coordination registry resources released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyComponent(&'static str);

    impl Component for DummyComponent {
        fn name(&self) -> &'static str {
            self.0
        }
    }

    fn registry_with_fake_worker(script: &str) -> CoordinationRegistry {
        let spawn = WorkerSpawnSpec {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), script.to_string()],
        };
        CoordinationRegistry::new(spawn, ExecutionConfig::default())
    }

    // A fake worker that speaks just enough protocol: one ready frame,
    // then drains stdin until EOF.
    const READY_WORKER: &str = r#"printf '{"protocol_version":1,"timestamp":"2024-01-01T00:00:00Z","message":{"status":"ready","project":"demo","pid":1,"functions":0}}\n'; cat >/dev/null"#;

    #[tokio::test]
    async fn test_component_slots() {
        let registry = registry_with_fake_worker("true");

        registry
            .register_component(Arc::new(DummyComponent("master")))
            .await
            .unwrap();

        assert!(registry.get_component("master").await.is_some());
        // Empty slot is absent, not an error
        assert!(registry.get_component("task_manager").await.is_none());

        let err = registry
            .register_component(Arc::new(DummyComponent("mystery")))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::ConfigurationError(_)));
    }

    #[tokio::test]
    async fn test_task_signal_lifecycle() {
        let registry = registry_with_fake_worker("true");

        registry.create_task_signals("t1").await;
        assert!(!registry.task_cancelled("t1").await);

        assert!(registry.signal_task_cancel("t1").await);
        assert!(registry.task_cancelled("t1").await);

        registry.cleanup_task_resources("t1").await;
        registry.cleanup_task_resources("t1").await; // idempotent
        assert!(!registry.signal_task_cancel("t1").await);
    }

    #[tokio::test]
    async fn test_dispatcher_cached_per_project() {
        let registry = registry_with_fake_worker("true");

        let a = registry.dispatcher("alpha").await;
        let b = registry.dispatcher("alpha").await;
        assert!(Arc::ptr_eq(&a, &b));

        let other = registry.dispatcher("beta").await;
        assert!(!Arc::ptr_eq(&a, &other));
    }

    #[tokio::test]
    async fn test_start_is_noop_while_live() {
        let registry = registry_with_fake_worker(READY_WORKER);

        assert!(registry.start_project_process("demo").await);
        assert!(registry.wait_for_ready("demo", Duration::from_secs(5)).await);
        assert!(registry.check_process_status("demo").await);
        let first = registry.worker("demo").await.unwrap();

        // Second start while live keeps the same handle
        assert!(registry.start_project_process("demo").await);
        let second = registry.worker("demo").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        registry.terminate_process("demo").await;
        assert!(!registry.check_process_status("demo").await);
    }

    #[tokio::test]
    async fn test_terminate_unknown_project_is_noop() {
        let registry = registry_with_fake_worker("true");
        registry.terminate_process("ghost").await;
        registry.terminate_process("ghost").await;
    }

    #[tokio::test]
    async fn test_cleanup_resources_releases_everything() {
        let registry = registry_with_fake_worker(READY_WORKER);
        registry
            .register_component(Arc::new(DummyComponent("registry")))
            .await
            .unwrap();
        registry.create_task_signals("t1").await;
        registry.start_project_process("demo").await;
        registry.wait_for_ready("demo", Duration::from_secs(5)).await;

        registry.cleanup_resources().await;

        assert!(registry.worker("demo").await.is_none());
        assert!(registry.get_component("registry").await.is_none());
        assert!(!registry.task_cancelled("t1").await);
    }
}
