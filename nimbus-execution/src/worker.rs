//! Worker-side runtime: function loading and the command loop
//!
//! One worker process owns one project. Initialization failures are
//! surfaced through the protocol, never swallowed: the worker always sends
//! its one-shot ready frame so the master cannot hang on a readiness wait,
//! and a worker that failed to initialize answers every execute command
//! with an error instead.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use nimbus_config::NimbusConfig;
use nimbus_ipc::{IpcError, IpcTransport, MessageEnvelope, StdioTransport, WorkerCommand, WorkerReply};
use nimbus_registry::{
    load_project, project_env, scan_functions, EnvironmentProvisioner, FunctionSpec, HandlerKind,
    LoadStatus, SetupCommandProvisioner,
};

use crate::dispatch::SyncDispatcher;
use crate::error::ExecutionError;
use crate::resolver::{CommandResolver, FunctionHandler, HandlerResolver, StaticResolver};

/// Options a worker process needs to bootstrap itself
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub project: String,
    pub projects_dir: PathBuf,
    pub default_entry: String,
    pub system_env_file: Option<PathBuf>,
    pub max_sync_dispatch: usize,
}

impl WorkerOptions {
    pub fn from_config(project: impl Into<String>, config: &NimbusConfig) -> Self {
        Self {
            project: project.into(),
            projects_dir: config.projects.projects_dir.clone(),
            default_entry: config.projects.default_entry_point.clone(),
            system_env_file: config.projects.system_env_file.clone(),
            max_sync_dispatch: config.execution.max_sync_dispatch,
        }
    }
}

/// The worker's single-consumer execution loop over one project's functions
pub struct WorkerRuntime {
    project: String,
    functions: HashMap<String, FunctionSpec>,
    handlers: HashMap<String, Arc<dyn FunctionHandler>>,
    resolver: Arc<dyn HandlerResolver>,
    dispatcher: Arc<SyncDispatcher>,
    init_error: Option<String>,
}

impl WorkerRuntime {
    /// Initialize the runtime for a project: environment, dependencies,
    /// function scan. Never fails; an initialization error is recorded and
    /// reported per-command instead, after the ready frame goes out.
    pub async fn bootstrap(options: WorkerOptions, provisioner: &dyn EnvironmentProvisioner) -> Self {
        let project = options.project.clone();
        let dispatcher = Arc::new(SyncDispatcher::new(options.max_sync_dispatch));

        match Self::initialize(&options, provisioner).await {
            Ok((functions, resolver)) => {
                info!(
                    "Worker for {} initialized with {} functions",
                    project,
                    functions.len()
                );
                Self {
                    project,
                    functions,
                    handlers: HashMap::new(),
                    resolver,
                    dispatcher,
                    init_error: None,
                }
            }
            Err(e) => {
                error!("Worker for {} failed to initialize: {}", project, e);
                Self::failed_with(project, e.to_string(), dispatcher)
            }
        }
    }

    /// Runtime with a pre-built function table and resolver (embedded use
    /// and tests)
    pub fn with_resolver(
        project: impl Into<String>,
        functions: Vec<FunctionSpec>,
        resolver: Arc<dyn HandlerResolver>,
        dispatcher: Arc<SyncDispatcher>,
    ) -> Self {
        Self {
            project: project.into(),
            functions: functions.into_iter().map(|f| (f.name.clone(), f)).collect(),
            handlers: HashMap::new(),
            resolver,
            dispatcher,
            init_error: None,
        }
    }

    /// Runtime representing a failed initialization
    pub fn failed(project: impl Into<String>, error: impl Into<String>) -> Self {
        Self::failed_with(
            project.into(),
            error.into(),
            Arc::new(SyncDispatcher::with_default_capacity()),
        )
    }

    fn failed_with(project: String, error: String, dispatcher: Arc<SyncDispatcher>) -> Self {
        Self {
            project,
            functions: HashMap::new(),
            handlers: HashMap::new(),
            resolver: Arc::new(StaticResolver::new()),
            dispatcher,
            init_error: Some(error),
        }
    }

    async fn initialize(
        options: &WorkerOptions,
        provisioner: &dyn EnvironmentProvisioner,
    ) -> Result<(HashMap<String, FunctionSpec>, Arc<dyn HandlerResolver>), ExecutionError> {
        let root = options.projects_dir.join(&options.project);
        let project = load_project(&root).await?;

        provisioner.ensure_environment(&project).await?;
        provisioner.install_dependencies(&project).await?;

        let functions = scan_functions(&project, &options.default_entry).await?;
        let env = project_env(&project, options.system_env_file.as_deref())?;

        let resolver: Arc<dyn HandlerResolver> =
            Arc::new(CommandResolver::new(project.manifest.runtime.command.clone(), env));

        Ok((
            functions.into_iter().map(|f| (f.name.clone(), f)).collect(),
            resolver,
        ))
    }

    fn registered_count(&self) -> usize {
        self.functions
            .values()
            .filter(|f| f.status != LoadStatus::Unregistered)
            .count()
    }

    /// Run the command loop until a stop command arrives or the channel
    /// closes. The ready frame is sent first, exactly once, regardless of
    /// whether initialization succeeded.
    pub async fn run<T: IpcTransport>(&mut self, transport: &mut T) -> Result<(), ExecutionError> {
        transport
            .send(&MessageEnvelope::new(WorkerReply::Ready {
                project: self.project.clone(),
                pid: std::process::id(),
                functions: self.registered_count(),
            }))
            .await?;

        loop {
            let envelope: MessageEnvelope<WorkerCommand> = match transport.receive().await {
                Ok(envelope) => envelope,
                Err(IpcError::ConnectionClosed) => {
                    info!("Command channel closed, worker for {} exiting", self.project);
                    return Ok(());
                }
                Err(e) => {
                    // A malformed frame must not take the worker down
                    warn!("Dropping unreadable command: {}", e);
                    continue;
                }
            };

            match envelope.message {
                WorkerCommand::Stop => {
                    info!("Worker for {} received stop", self.project);
                    return Ok(());
                }
                WorkerCommand::Execute {
                    function_name,
                    payload,
                    correlation_id,
                } => {
                    let reply = match self.handle_execute(&function_name, payload).await {
                        Ok(result) => WorkerReply::Success {
                            correlation_id,
                            result,
                        },
                        Err(e) => WorkerReply::Error {
                            correlation_id,
                            // Handler errors travel verbatim
                            error: match e {
                                ExecutionError::FunctionFailed(message) => message,
                                other => other.to_string(),
                            },
                        },
                    };

                    if let Err(e) = transport.send(&MessageEnvelope::new(reply)).await {
                        warn!("Failed to send reply for {}: {}", function_name, e);
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Dispatch one execute command. All handler errors are caught here and
    /// converted into error replies by the loop, so one bad invocation never
    /// takes the worker down.
    async fn handle_execute(
        &mut self,
        function_name: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, ExecutionError> {
        if let Some(ref error) = self.init_error {
            return Err(ExecutionError::WorkerError(format!(
                "worker not initialized: {}",
                error
            )));
        }

        // Unknown functions are rejected before any dispatch
        let spec = match self.functions.get(function_name) {
            Some(spec) if spec.status != LoadStatus::Unregistered => spec.clone(),
            _ => {
                return Err(ExecutionError::FunctionNotFound {
                    project: self.project.clone(),
                    function: function_name.to_string(),
                })
            }
        };

        let handler = match self.handlers.get(function_name) {
            Some(handler) => handler.clone(),
            None => {
                // Lazy load on first use; a load failure stays scoped to
                // this one function
                let handler = self.resolver.resolve(&spec).await?;
                if let Some(spec) = self.functions.get_mut(function_name) {
                    spec.status = LoadStatus::Loaded;
                }
                self.handlers.insert(function_name.to_string(), handler.clone());
                debug!("Loaded handler for {}/{}", self.project, function_name);
                handler
            }
        };

        match handler.kind() {
            HandlerKind::Async => handler.invoke(payload).await,
            HandlerKind::Sync => {
                let handler = handler.clone();
                self.dispatcher
                    .dispatch(move || handler.invoke_blocking(payload))
                    .await?
            }
        }
    }
}

/// Entry point for a spawned worker process: bootstrap against the project
/// directory and serve commands over stdio until stopped.
pub async fn run_worker(options: WorkerOptions) -> Result<(), ExecutionError> {
    let provisioner = SetupCommandProvisioner;
    let mut runtime = WorkerRuntime::bootstrap(options, &provisioner).await;
    let mut transport = StdioTransport::new();
    runtime.run(&mut transport).await
}
