//! Task manager: durable, pollable, cancellable units of work
//!
//! Converts the master's synchronous `execute_function` into background
//! tasks with persisted lifecycle transitions, plus the cron scheduler and
//! the periodic age-based sweep.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use nimbus_config::{SchedulerConfig, TaskConfig};
use nimbus_execution::{Component, CoordinationRegistry, Master};
use serde_json::Value as JsonValue;

use crate::error::Result;
use crate::schedule::ScheduleDocument;
use crate::scheduler::TaskScheduler;
use crate::store::TaskStore;
use crate::task::{TaskRecord, TaskStatus};

/// Task manager built on `Master::execute_function`
pub struct TaskManager {
    master: Arc<Master>,
    registry: Arc<CoordinationRegistry>,
    store: TaskStore,
    config: TaskConfig,
    scheduler_config: SchedulerConfig,
    tasks: Mutex<HashMap<String, TaskRecord>>,
    scheduler: Mutex<Option<TaskScheduler>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Component for TaskManager {
    fn name(&self) -> &'static str {
        "task_manager"
    }
}

impl TaskManager {
    pub fn new(
        master: Arc<Master>,
        registry: Arc<CoordinationRegistry>,
        store: TaskStore,
        config: TaskConfig,
        scheduler_config: SchedulerConfig,
    ) -> Self {
        Self {
            master,
            registry,
            store,
            config,
            scheduler_config,
            tasks: Mutex::new(HashMap::new()),
            scheduler: Mutex::new(None),
            sweeper: Mutex::new(None),
        }
    }

    /// Start the task layer: the store directory, the cron scheduler (when
    /// a schedule document is configured), and the periodic sweep.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.store.ensure_dir().await?;

        if self.scheduler_config.enabled {
            if let Some(ref path) = self.scheduler_config.schedule_file {
                let document = ScheduleDocument::load(path).await?;
                info!("Loaded schedule document with {} jobs", document.jobs.len());
                let scheduler = TaskScheduler::start(document, self.clone()).await?;
                *self.scheduler.lock().await = Some(scheduler);
            }
        }

        let manager = self.clone();
        let interval = self.config.sweep_interval;
        let retention_days = self.config.retention_days;
        *self.sweeper.lock().await = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match manager.cleanup_old_tasks(retention_days).await {
                    Ok(0) => {}
                    Ok(n) => info!("Swept {} old task records", n),
                    Err(e) => error!("Task sweep failed: {}", e),
                }
            }
        }));

        info!("Task manager started");
        Ok(())
    }

    /// Stop the scheduler and the sweep loop
    pub async fn shutdown(&self) {
        if let Some(mut scheduler) = self.scheduler.lock().await.take() {
            scheduler.shutdown().await;
        }
        if let Some(sweeper) = self.sweeper.lock().await.take() {
            sweeper.abort();
        }
        info!("Task manager shut down");
    }

    /// Create a task for `(project, function, payload)` and schedule its
    /// background execution; returns immediately.
    ///
    /// When an active task for the same pair already exists, that task is
    /// returned unchanged, so redundant concurrent requests for one function
    /// collapse onto the in-flight task.
    pub async fn create_task(
        self: &Arc<Self>,
        project: &str,
        function: &str,
        payload: JsonValue,
    ) -> Result<TaskRecord> {
        let record = {
            let mut tasks = self.tasks.lock().await;

            if let Some(active) = tasks
                .values()
                .find(|t| t.project_name == project && t.function_name == function && t.status.is_active())
            {
                debug!(
                    "Returning active task {} for {}/{}",
                    active.task_id, project, function
                );
                return Ok(active.clone());
            }

            let record = TaskRecord::new(project, function, payload);
            tasks.insert(record.task_id.clone(), record.clone());
            record
        };

        self.store.save(&record).await?;
        self.registry.create_task_signals(&record.task_id).await;

        let manager = self.clone();
        let task_id = record.task_id.clone();
        tokio::spawn(async move {
            manager.run_task(task_id).await;
        });

        info!(
            "Created task {} for {}/{}",
            record.task_id, record.project_name, record.function_name
        );
        Ok(record)
    }

    /// Background execution of one task. The terminal transition is always
    /// persisted and the task's signals are always released, whatever
    /// happened on the way.
    async fn run_task(self: Arc<Self>, task_id: String) {
        if let Err(e) = self.execute_task(&task_id).await {
            error!("Task {} execution error: {}", task_id, e);
        }

        // Guaranteed cleanup, even when execution raised
        self.registry.cleanup_task_resources(&task_id).await;
    }

    async fn execute_task(&self, task_id: &str) -> Result<()> {
        let (project, function, payload) = {
            let mut tasks = self.tasks.lock().await;
            let Some(record) = tasks.get_mut(task_id) else {
                warn!("Task {} vanished before execution", task_id);
                return Ok(());
            };

            // A cancel that landed before this coroutine ran wins
            if record.status != TaskStatus::Created {
                debug!("Task {} is {:?}, not executing", task_id, record.status);
                return Ok(());
            }
            if self.registry.task_cancelled(task_id).await {
                record.transition(TaskStatus::Cancelled);
                let snapshot = record.clone();
                drop(tasks);
                self.store.save(&snapshot).await?;
                return Ok(());
            }

            record.transition(TaskStatus::Running);
            (
                record.project_name.clone(),
                record.function_name.clone(),
                record.payload.clone(),
            )
        };
        self.persist(task_id).await?;

        let outcome = self.master.execute_function(&project, &function, payload).await;

        {
            let mut tasks = self.tasks.lock().await;
            let Some(record) = tasks.get_mut(task_id) else {
                return Ok(());
            };

            // A task cancelled mid-flight stays cancelled; the late result
            // is discarded
            if record.status != TaskStatus::Running {
                debug!(
                    "Task {} reached {:?} while executing, discarding result",
                    task_id, record.status
                );
                return Ok(());
            }

            match outcome {
                Ok(result) => {
                    record.result = Some(result);
                    record.transition(TaskStatus::Completed);
                }
                Err(e) => {
                    record.error = Some(e.to_string());
                    record.transition(TaskStatus::Failed);
                }
            }
        }
        self.persist(task_id).await?;

        Ok(())
    }

    async fn persist(&self, task_id: &str) -> Result<()> {
        let snapshot = self.tasks.lock().await.get(task_id).cloned();
        if let Some(record) = snapshot {
            self.store.save(&record).await?;
        }
        Ok(())
    }

    /// Look up a task: the in-memory cache first, then the on-disk record
    /// (which survives a control-plane restart). Absent everywhere is
    /// `None`, not an error.
    pub async fn get_task_status(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        if let Some(record) = self.tasks.lock().await.get(task_id) {
            return Ok(Some(record.clone()));
        }

        match self.store.load(task_id).await? {
            Some(record) => {
                self.tasks
                    .lock()
                    .await
                    .entry(task_id.to_string())
                    .or_insert_with(|| record.clone());
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List persisted tasks; absent filters are wildcards
    pub async fn list_tasks(
        &self,
        project: Option<&str>,
        status: Option<TaskStatus>,
    ) -> Result<Vec<TaskRecord>> {
        let mut records = self.store.load_all().await?;
        records.retain(|r| {
            project.map(|p| r.project_name == p).unwrap_or(true)
                && status.map(|s| r.status == s).unwrap_or(true)
        });
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// Cancel a task. Only `created` or `running` tasks can be cancelled;
    /// anything else is a no-op returning `false`.
    ///
    /// Cancellation is non-preemptive: the cancel signal latches and the
    /// record goes terminal, but an invocation already inside a worker is
    /// not interrupted; its eventual result is discarded.
    pub async fn cancel_task(&self, task_id: &str) -> Result<bool> {
        {
            let mut tasks = self.tasks.lock().await;

            if !tasks.contains_key(task_id) {
                match self.store.load(task_id).await? {
                    Some(record) => {
                        tasks.insert(task_id.to_string(), record);
                    }
                    None => return Ok(false),
                }
            }

            let Some(record) = tasks.get_mut(task_id) else {
                return Ok(false);
            };
            if !record.status.is_active() {
                return Ok(false);
            }

            self.registry.signal_task_cancel(task_id).await;
            record.transition(TaskStatus::Cancelled);
        }

        self.persist(task_id).await?;
        self.registry.cleanup_task_resources(task_id).await;
        info!("Task {} cancelled", task_id);
        Ok(true)
    }

    /// Sweep persisted records older than `days` days. In-memory active
    /// tasks are never touched.
    pub async fn cleanup_old_tasks(&self, days: u32) -> Result<usize> {
        let removed = self.store.sweep_older_than(days).await?;

        let mut tasks = self.tasks.lock().await;
        for task_id in &removed {
            if let Some(record) = tasks.get(task_id) {
                if record.status.is_active() {
                    continue;
                }
            }
            tasks.remove(task_id);
        }

        Ok(removed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_config::NimbusConfig;
    use nimbus_execution::WorkerSpawnSpec;
    use nimbus_registry::ProjectRegistry;
    use serde_json::json;
    use std::path::PathBuf;
    use std::time::Duration;

    /// Manager wired to a master whose workers never become ready.
    /// `worker_script` controls how: a long sleep keeps executions pinned
    /// in the readiness wait, an immediate exit fails them fast.
    fn manager_fixture(
        dir: &std::path::Path,
        ready_timeout: Duration,
        worker_script: &str,
    ) -> Arc<TaskManager> {
        let mut config = NimbusConfig::default();
        config.execution.worker_ready_timeout = ready_timeout;
        config.execution.worker_stop_timeout = Duration::from_secs(1);

        let spawn = WorkerSpawnSpec {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), worker_script.to_string()],
        };

        let registry = Arc::new(CoordinationRegistry::new(spawn, config.execution.clone()));
        let projects = Arc::new(ProjectRegistry::new(dir.join("projects"), "main".to_string()));
        let master = Arc::new(Master::new(registry.clone(), projects, config));

        Arc::new(TaskManager::new(
            master,
            registry,
            TaskStore::new(dir.join("tasks")),
            TaskConfig::default(),
            SchedulerConfig {
                enabled: false,
                schedule_file: None,
            },
        ))
    }

    async fn wait_for_terminal(manager: &Arc<TaskManager>, task_id: &str) -> TaskRecord {
        for _ in 0..200 {
            let record = manager.get_task_status(task_id).await.unwrap().unwrap();
            if record.status.is_terminal() {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("task {} never reached a terminal status", task_id);
    }

    #[tokio::test]
    async fn test_create_task_deduplicates_active_pair() {
        let dir = tempfile::tempdir().unwrap();
        // The sleeping worker keeps the first task pinned in the readiness wait
        let manager = manager_fixture(dir.path(), Duration::from_secs(60), "sleep 300");
        manager.store.ensure_dir().await.unwrap();

        let first = manager.create_task("demo", "echo", json!({"x": 1})).await.unwrap();
        let second = manager.create_task("demo", "echo", json!({"x": 2})).await.unwrap();
        assert_eq!(first.task_id, second.task_id);
        // The original payload is untouched by the duplicate request
        assert_eq!(second.payload, json!({"x": 1}));

        // A different function gets its own task
        let other = manager.create_task("demo", "other", json!({})).await.unwrap();
        assert_ne!(other.task_id, first.task_id);
    }

    #[tokio::test]
    async fn test_terminal_task_allows_new_creation() {
        let dir = tempfile::tempdir().unwrap();
        // The fake worker exits immediately, so the task fails fast
        let manager = manager_fixture(dir.path(), Duration::from_millis(200), "true");
        manager.store.ensure_dir().await.unwrap();

        let first = manager.create_task("demo", "echo", json!({})).await.unwrap();
        let finished = wait_for_terminal(&manager, &first.task_id).await;
        assert_eq!(finished.status, TaskStatus::Failed);
        assert!(finished.error.is_some());

        let second = manager.create_task("demo", "echo", json!({})).await.unwrap();
        assert_ne!(second.task_id, first.task_id);
    }

    #[tokio::test]
    async fn test_cancel_created_task_never_completes() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_fixture(dir.path(), Duration::from_secs(60), "sleep 300");
        manager.store.ensure_dir().await.unwrap();

        let record = manager.create_task("demo", "echo", json!({})).await.unwrap();
        assert!(manager.cancel_task(&record.task_id).await.unwrap());

        let current = manager.get_task_status(&record.task_id).await.unwrap().unwrap();
        assert_eq!(current.status, TaskStatus::Cancelled);

        // Cancelling a terminal task is a no-op
        assert!(!manager.cancel_task(&record.task_id).await.unwrap());

        // The cancelled status is persisted
        let on_disk = manager.store.load(&record.task_id).await.unwrap().unwrap();
        assert_eq!(on_disk.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_unknown_task_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_fixture(dir.path(), Duration::from_secs(60), "sleep 300");
        manager.store.ensure_dir().await.unwrap();

        assert!(!manager.cancel_task("demo_echo_missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_task_status_falls_back_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_fixture(dir.path(), Duration::from_secs(60), "sleep 300");
        manager.store.ensure_dir().await.unwrap();

        // Simulate a record left over from a previous process
        let mut record = TaskRecord::new("demo", "old", json!({}));
        record.transition(TaskStatus::Completed);
        record.result = Some(json!("done"));
        manager.store.save(&record).await.unwrap();

        let loaded = manager.get_task_status(&record.task_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Completed);
        assert_eq!(loaded.result, Some(json!("done")));

        assert!(manager.get_task_status("demo_echo_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_tasks_filters() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_fixture(dir.path(), Duration::from_secs(60), "sleep 300");
        manager.store.ensure_dir().await.unwrap();

        let mut a = TaskRecord::new("alpha", "echo", json!({}));
        a.transition(TaskStatus::Completed);
        manager.store.save(&a).await.unwrap();

        let mut b = TaskRecord::new("beta", "echo", json!({}));
        b.transition(TaskStatus::Failed);
        manager.store.save(&b).await.unwrap();

        assert_eq!(manager.list_tasks(None, None).await.unwrap().len(), 2);
        assert_eq!(manager.list_tasks(Some("alpha"), None).await.unwrap().len(), 1);
        assert_eq!(
            manager
                .list_tasks(None, Some(TaskStatus::Failed))
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(manager
            .list_tasks(Some("alpha"), Some(TaskStatus::Failed))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_old_tasks_sweeps_disk_only() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_fixture(dir.path(), Duration::from_secs(60), "sleep 300");
        manager.store.ensure_dir().await.unwrap();

        let mut old = TaskRecord::new("demo", "stale", json!({}));
        old.created_at = chrono::Utc::now() - chrono::Duration::days(30);
        old.transition(TaskStatus::Completed);
        manager.store.save(&old).await.unwrap();

        let swept = manager.cleanup_old_tasks(7).await.unwrap();
        assert_eq!(swept, 1);
        assert!(manager.store.load(&old.task_id).await.unwrap().is_none());
    }
}
