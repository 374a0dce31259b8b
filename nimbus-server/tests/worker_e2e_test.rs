//! End-to-end tests driving real worker processes through the nimbus
//! binary's `worker` subcommand.

use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use nimbus_config::NimbusConfig;
use nimbus_execution::{CoordinationRegistry, ExecutionError, Master, WorkerSpawnSpec};
use nimbus_registry::ProjectRegistry;
use nimbus_tasks::{TaskManager, TaskStatus, TaskStore};

struct Fixture {
    _dir: tempfile::TempDir,
    registry: Arc<CoordinationRegistry>,
    master: Arc<Master>,
    tasks: Arc<TaskManager>,
}

fn write_demo_project(projects_dir: &Path) {
    let root = projects_dir.join("demo");
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(
        root.join("project.yaml"),
        "runtime:\n  command: [\"sh\"]\n  extension: \".sh\"\n",
    )
    .unwrap();
    // echo returns its input payload unchanged
    std::fs::write(root.join("echo.sh"), "cat\n").unwrap();
    std::fs::write(root.join("boom.sh"), "echo 'ValueError: boom' >&2\nexit 1\n").unwrap();
}

fn build_fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let projects_dir = dir.path().join("projects");
    write_demo_project(&projects_dir);

    // Config file shared with spawned workers
    let config_path = dir.path().join("nimbus.yaml");
    std::fs::write(
        &config_path,
        format!(
            "projects:\n  projects_dir: \"{}\"\ntasks:\n  tasks_dir: \"{}\"\nexecution:\n  response_poll_interval: 100\n  worker_stop_timeout: 2\n",
            projects_dir.display(),
            dir.path().join("tasks").display(),
        ),
    )
    .unwrap();

    let mut config = NimbusConfig::default();
    config.projects.projects_dir = projects_dir.clone();
    config.tasks.tasks_dir = dir.path().join("tasks");
    config.execution.response_poll_interval = Duration::from_millis(100);
    config.execution.worker_stop_timeout = Duration::from_secs(2);

    let spawn = WorkerSpawnSpec {
        program: PathBuf::from(env!("CARGO_BIN_EXE_nimbus")),
        args: vec![
            "worker".to_string(),
            "--config".to_string(),
            config_path.display().to_string(),
        ],
    };

    let registry = Arc::new(CoordinationRegistry::new(spawn, config.execution.clone()));
    let projects = Arc::new(ProjectRegistry::new(projects_dir, "main".to_string()));
    let master = Arc::new(Master::new(registry.clone(), projects, config.clone()));
    let tasks = Arc::new(TaskManager::new(
        master.clone(),
        registry.clone(),
        TaskStore::new(config.tasks.tasks_dir.clone()),
        config.tasks.clone(),
        config.scheduler.clone(),
    ));

    Fixture {
        _dir: dir,
        registry,
        master,
        tasks,
    }
}

async fn wait_for_terminal(tasks: &Arc<TaskManager>, task_id: &str) -> nimbus_tasks::TaskRecord {
    for _ in 0..300 {
        let record = tasks.get_task_status(task_id).await.unwrap().unwrap();
        if record.status.is_terminal() {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("task {} never reached a terminal status", task_id);
}

#[tokio::test]
async fn test_echo_round_trip() {
    let fixture = build_fixture();

    let result = fixture
        .master
        .execute_function("demo", "echo", json!({"x": 1}))
        .await
        .unwrap();
    assert_eq!(result, json!({"x": 1}));

    // The worker stays up between invocations
    let result = fixture
        .master
        .execute_function("demo", "echo", json!([1, 2, 3]))
        .await
        .unwrap();
    assert_eq!(result, json!([1, 2, 3]));

    fixture.registry.cleanup_resources().await;
}

#[tokio::test]
async fn test_handler_error_surfaces_verbatim() {
    let fixture = build_fixture();

    let error = fixture
        .master
        .execute_function("demo", "boom", json!({}))
        .await
        .unwrap_err();
    match error {
        ExecutionError::FunctionFailed(message) => assert!(message.contains("boom")),
        other => panic!("unexpected error: {:?}", other),
    }

    // The same failure recorded through the task manager
    fixture.tasks.start().await.unwrap();
    let record = fixture.tasks.create_task("demo", "boom", json!({})).await.unwrap();
    let finished = wait_for_terminal(&fixture.tasks, &record.task_id).await;
    assert_eq!(finished.status, TaskStatus::Failed);
    assert!(finished.error.unwrap().contains("boom"));

    fixture.tasks.shutdown().await;
    fixture.registry.cleanup_resources().await;
}

#[tokio::test]
async fn test_unknown_function_is_an_error_reply() {
    let fixture = build_fixture();

    let error = fixture
        .master
        .execute_function("demo", "missing", json!({}))
        .await
        .unwrap_err();
    match error {
        ExecutionError::FunctionFailed(message) => assert!(message.contains("missing")),
        other => panic!("unexpected error: {:?}", other),
    }

    fixture.registry.cleanup_resources().await;
}

#[tokio::test]
async fn test_double_start_keeps_single_worker() {
    let fixture = build_fixture();

    assert!(fixture.registry.start_project_process("demo").await);
    assert!(fixture.registry.wait_for_ready("demo", Duration::from_secs(20)).await);
    let first = fixture.registry.worker("demo").await.unwrap();

    assert!(fixture.registry.start_project_process("demo").await);
    let second = fixture.registry.worker("demo").await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.pid(), second.pid());

    fixture.registry.cleanup_resources().await;
}

#[tokio::test]
async fn test_killed_worker_is_detected_and_restarted() {
    let fixture = build_fixture();

    let result = fixture
        .master
        .execute_function("demo", "echo", json!({"x": 1}))
        .await
        .unwrap();
    assert_eq!(result, json!({"x": 1}));

    // Kill the worker out-of-band
    let handle = fixture.registry.worker("demo").await.unwrap();
    let pid = handle.pid().expect("worker pid");
    std::process::Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status()
        .unwrap();

    for _ in 0..100 {
        if !handle.is_process_alive().await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!fixture.registry.check_process_status("demo").await);

    // The next call restarts the worker and succeeds
    let result = fixture
        .master
        .execute_function("demo", "echo", json!({"x": 1}))
        .await
        .unwrap();
    assert_eq!(result, json!({"x": 1}));

    let restarted = fixture.registry.worker("demo").await.unwrap();
    assert_ne!(restarted.pid(), Some(pid));

    fixture.registry.cleanup_resources().await;
}

#[tokio::test]
async fn test_terminate_is_idempotent() {
    let fixture = build_fixture();

    assert!(fixture.registry.start_project_process("demo").await);
    assert!(fixture.registry.wait_for_ready("demo", Duration::from_secs(20)).await);

    fixture.registry.terminate_process("demo").await;
    assert!(!fixture.registry.check_process_status("demo").await);

    // Terminating an already-stopped project is a no-op
    fixture.registry.terminate_process("demo").await;
}

#[tokio::test]
async fn test_task_round_trip_persists_result() {
    let fixture = build_fixture();
    fixture.tasks.start().await.unwrap();

    let record = fixture
        .tasks
        .create_task("demo", "echo", json!({"n": 7}))
        .await
        .unwrap();
    let finished = wait_for_terminal(&fixture.tasks, &record.task_id).await;
    assert_eq!(finished.status, TaskStatus::Completed);
    assert_eq!(finished.result, Some(json!({"n": 7})));

    // The persisted record carries the same terminal state, as a restarted
    // manager would see it
    let store = TaskStore::new(fixture._dir.path().join("tasks"));
    let reloaded = store.load(&record.task_id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, TaskStatus::Completed);
    assert_eq!(reloaded.result, Some(json!({"n": 7})));
    assert_eq!(reloaded.created_at, finished.created_at);

    fixture.tasks.shutdown().await;
    fixture.registry.cleanup_resources().await;
}

#[tokio::test]
async fn test_schedule_firing_creates_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let projects_dir = dir.path().join("projects");
    write_demo_project(&projects_dir);

    let config_path = dir.path().join("nimbus.yaml");
    let schedule_path = dir.path().join("schedule.yaml");
    std::fs::write(
        &schedule_path,
        "jobs:\n  heartbeat:\n    project: demo\n    function: echo\n    cron: \"*/1 * * * * *\"\n    args: { beat: true }\n",
    )
    .unwrap();
    std::fs::write(
        &config_path,
        format!(
            "projects:\n  projects_dir: \"{}\"\ntasks:\n  tasks_dir: \"{}\"\n",
            projects_dir.display(),
            dir.path().join("tasks").display(),
        ),
    )
    .unwrap();

    let mut config = NimbusConfig::default();
    config.projects.projects_dir = projects_dir.clone();
    config.tasks.tasks_dir = dir.path().join("tasks");
    config.scheduler.schedule_file = Some(schedule_path);

    let spawn = WorkerSpawnSpec {
        program: PathBuf::from(env!("CARGO_BIN_EXE_nimbus")),
        args: vec![
            "worker".to_string(),
            "--config".to_string(),
            config_path.display().to_string(),
        ],
    };

    let registry = Arc::new(CoordinationRegistry::new(spawn, config.execution.clone()));
    let projects = Arc::new(ProjectRegistry::new(projects_dir, "main".to_string()));
    let master = Arc::new(Master::new(registry.clone(), projects, config.clone()));
    let tasks = Arc::new(TaskManager::new(
        master,
        registry.clone(),
        TaskStore::new(config.tasks.tasks_dir.clone()),
        config.tasks.clone(),
        config.scheduler.clone(),
    ));

    tasks.start().await.unwrap();

    // The every-second job should fire and run at least once
    let mut fired = Vec::new();
    for _ in 0..100 {
        fired = tasks
            .list_tasks(Some("demo"), Some(TaskStatus::Completed))
            .await
            .unwrap();
        if !fired.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(!fired.is_empty(), "scheduled job never produced a completed task");
    assert_eq!(fired[0].function_name, "echo");
    assert_eq!(fired[0].result, Some(json!({"beat": true})));

    tasks.shutdown().await;
    registry.cleanup_resources().await;
}
