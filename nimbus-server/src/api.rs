//! HTTP API layer
//!
//! Thin axum surface over the master and the task manager. The dependency
//! runs one way only: routes call into the core, the core never calls back
//! into route code.

use async_trait::async_trait;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use nimbus_config::ServerConfig;
use nimbus_execution::{ApiLayer, Component, CoordinationRegistry, ExecutionError, Master};
use nimbus_registry::{ProjectRegistry, RegistryError};
use nimbus_tasks::{TaskManager, TaskStatus};

/// Shared state handed to every route handler
#[derive(Clone)]
struct ApiState {
    master: Arc<Master>,
    tasks: Arc<TaskManager>,
    projects: Arc<ProjectRegistry>,
    registry: Arc<CoordinationRegistry>,
}

/// The axum-backed `ApiLayer` implementation
pub struct HttpApi {
    config: ServerConfig,
    state: ApiState,
    ready: AtomicBool,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    server: Mutex<Option<JoinHandle<()>>>,
}

impl Component for HttpApi {
    fn name(&self) -> &'static str {
        "api_server"
    }
}

impl HttpApi {
    pub fn new(
        config: ServerConfig,
        master: Arc<Master>,
        tasks: Arc<TaskManager>,
        projects: Arc<ProjectRegistry>,
        registry: Arc<CoordinationRegistry>,
    ) -> Self {
        Self {
            config,
            state: ApiState {
                master,
                tasks,
                projects,
                registry,
            },
            ready: AtomicBool::new(false),
            shutdown_tx: Mutex::new(None),
            server: Mutex::new(None),
        }
    }

    fn build_router(&self) -> Router {
        let mut app = Router::new()
            .route("/", get(root))
            .route("/health", get(health))
            .route(
                "/api/v1/functions/{project}/{function}/invoke",
                post(invoke_function),
            )
            .route("/api/v1/functions/{project}", get(list_functions))
            .route(
                "/api/v1/functions/{project}/{function}",
                delete(delete_function),
            )
            .route("/api/v1/projects", get(list_projects))
            .route("/api/v1/projects/{project}/deploy", post(deploy_project))
            .route("/api/v1/projects/{project}", delete(delete_project))
            .route("/api/v1/tasks", post(create_task).get(list_tasks))
            .route("/api/v1/tasks/{task_id}", get(get_task).delete(cancel_task))
            .with_state(self.state.clone());

        if self.config.enable_tracing {
            app = app.layer(TraceLayer::new_for_http());
        }
        app
    }
}

#[async_trait]
impl ApiLayer for HttpApi {
    async fn start(&self) -> Result<(), ExecutionError> {
        let addr = self.config.socket_addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| ExecutionError::ConfigurationError(format!("cannot bind {}: {}", addr, e)))?;

        info!("API server listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let app = self.build_router();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                error!("API server error: {}", e);
            }
        });

        *self.shutdown_tx.lock().await = Some(shutdown_tx);
        *self.server.lock().await = Some(server);
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.ready.store(false, Ordering::SeqCst);
        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(());
        }
        if let Some(server) = self.server.lock().await.take() {
            let _ = server.await;
        }
        info!("API server stopped");
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

fn execution_error_response(error: ExecutionError) -> Response {
    let status = match &error {
        ExecutionError::FunctionNotFound { .. } => StatusCode::NOT_FOUND,
        ExecutionError::ProjectUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"status": "error", "error": error.to_string()}))).into_response()
}

fn registry_error_response(error: RegistryError) -> Response {
    let status = match &error {
        RegistryError::UnknownProject(_) | RegistryError::UnknownFunction { .. } => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"status": "error", "error": error.to_string()}))).into_response()
}

fn internal_error(error: impl std::fmt::Display) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"status": "error", "error": error.to_string()})),
    )
        .into_response()
}

async fn root() -> Json<JsonValue> {
    Json(json!({
        "service": "Nimbus Function Service",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

async fn health() -> Json<JsonValue> {
    Json(json!({"status": "healthy"}))
}

async fn invoke_function(
    State(state): State<ApiState>,
    Path((project, function)): Path<(String, String)>,
    Json(payload): Json<JsonValue>,
) -> Response {
    match state.master.execute_function(&project, &function, payload).await {
        Ok(result) => Json(json!({"status": "success", "result": result})).into_response(),
        Err(e) => execution_error_response(e),
    }
}

async fn list_projects(State(state): State<ApiState>) -> Json<JsonValue> {
    Json(json!({"projects": state.projects.list_projects().await}))
}

async fn list_functions(State(state): State<ApiState>, Path(project): Path<String>) -> Response {
    match state.projects.list_functions(&project).await {
        Ok(functions) => Json(json!({"functions": functions})).into_response(),
        Err(e) => registry_error_response(e),
    }
}

async fn deploy_project(State(state): State<ApiState>, Path(project): Path<String>) -> Response {
    if let Err(e) = state.projects.deploy_project(&project).await {
        return registry_error_response(e);
    }

    // Redeploy restarts the project's worker so it picks up the new code
    state.registry.terminate_process(&project).await;
    if !state.registry.start_project_process(&project).await {
        return internal_error(format!("worker for {} failed to restart", project));
    }

    Json(json!({"status": "success", "project": project})).into_response()
}

async fn delete_project(State(state): State<ApiState>, Path(project): Path<String>) -> Response {
    state.registry.terminate_process(&project).await;
    match state.projects.remove_project(&project).await {
        Ok(()) => Json(json!({"status": "success"})).into_response(),
        Err(e) => registry_error_response(e),
    }
}

async fn delete_function(
    State(state): State<ApiState>,
    Path((project, function)): Path<(String, String)>,
) -> Response {
    match state.projects.remove_function(&project, &function).await {
        Ok(()) => Json(json!({"status": "success"})).into_response(),
        Err(e) => registry_error_response(e),
    }
}

#[derive(Deserialize)]
struct CreateTaskRequest {
    project_name: String,
    function_name: String,
    #[serde(default)]
    payload: JsonValue,
}

async fn create_task(State(state): State<ApiState>, Json(req): Json<CreateTaskRequest>) -> Response {
    match state
        .tasks
        .create_task(&req.project_name, &req.function_name, req.payload)
        .await
    {
        Ok(record) => Json(json!(record)).into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Deserialize)]
struct TaskListQuery {
    project: Option<String>,
    status: Option<String>,
}

async fn list_tasks(State(state): State<ApiState>, Query(query): Query<TaskListQuery>) -> Response {
    let status = match query.status.as_deref() {
        Some(text) => match TaskStatus::from_str(text) {
            Ok(status) => Some(status),
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"status": "error", "error": e})),
                )
                    .into_response()
            }
        },
        None => None,
    };

    match state.tasks.list_tasks(query.project.as_deref(), status).await {
        Ok(records) => Json(json!({"tasks": records})).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn get_task(State(state): State<ApiState>, Path(task_id): Path<String>) -> Response {
    match state.tasks.get_task_status(&task_id).await {
        Ok(Some(record)) => Json(json!(record)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"status": "error", "error": format!("task {} not found", task_id)})),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

async fn cancel_task(State(state): State<ApiState>, Path(task_id): Path<String>) -> Response {
    match state.tasks.cancel_task(&task_id).await {
        Ok(cancelled) => Json(json!({"cancelled": cancelled})).into_response(),
        Err(e) => internal_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use nimbus_config::NimbusConfig;
    use nimbus_execution::WorkerSpawnSpec;
    use nimbus_tasks::TaskStore;
    use std::path::PathBuf;
    use tower::ServiceExt;

    async fn test_router(dir: &std::path::Path) -> Router {
        let projects_dir = dir.join("projects");
        let root = projects_dir.join("demo");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(
            root.join("project.yaml"),
            "runtime:\n  command: [\"sh\"]\n  extension: \".sh\"\n",
        )
        .unwrap();
        std::fs::write(root.join("echo.sh"), "cat\n").unwrap();

        let mut config = NimbusConfig::default();
        config.projects.projects_dir = projects_dir.clone();
        config.tasks.tasks_dir = dir.join("tasks");
        config.execution.worker_ready_timeout = std::time::Duration::from_millis(200);
        config.execution.worker_stop_timeout = std::time::Duration::from_secs(1);

        // Workers exit immediately: invocations fail fast with 503
        let spawn = WorkerSpawnSpec {
            program: PathBuf::from("true"),
            args: Vec::new(),
        };
        let registry = Arc::new(CoordinationRegistry::new(spawn, config.execution.clone()));
        let projects = Arc::new(ProjectRegistry::new(projects_dir, "main".to_string()));
        projects.scan_all().await.unwrap();
        let master = Arc::new(Master::new(registry.clone(), projects.clone(), config.clone()));
        let tasks = Arc::new(TaskManager::new(
            master.clone(),
            registry.clone(),
            TaskStore::new(config.tasks.tasks_dir.clone()),
            config.tasks.clone(),
            config.scheduler.clone(),
        ));

        let api = HttpApi::new(config.server.clone(), master, tasks, projects, registry);
        api.build_router()
    }

    async fn body_json(response: Response) -> JsonValue {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_and_root() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router(dir.path()).await;

        let response = router
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "healthy");

        let response = router
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await["service"], "Nimbus Function Service");
    }

    #[tokio::test]
    async fn test_project_listings() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router(dir.path()).await;

        let response = router
            .clone()
            .oneshot(Request::get("/api/v1/projects").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["projects"][0]["name"], "demo");

        let response = router
            .clone()
            .oneshot(Request::get("/api/v1/functions/demo").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["functions"][0]["name"], "echo");

        let response = router
            .oneshot(Request::get("/api/v1/functions/ghost").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invoke_unavailable_project_is_503() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router(dir.path()).await;

        let response = router
            .oneshot(
                Request::post("/api/v1/functions/demo/echo/invoke")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["status"], "error");
    }

    #[tokio::test]
    async fn test_task_routes() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router(dir.path()).await;

        let response = router
            .clone()
            .oneshot(Request::get("/api/v1/tasks/demo_echo_missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = router
            .clone()
            .oneshot(Request::get("/api/v1/tasks?status=bogus").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .oneshot(Request::get("/api/v1/tasks?status=failed").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_json(response).await["tasks"].as_array().unwrap().is_empty());
    }
}
