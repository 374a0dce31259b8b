//! Handler resolution: turning a function source into something callable
//!
//! The control plane stays agnostic of the project's language. A resolver
//! takes a function spec and returns a handler with a known calling
//! convention: async handlers are awaited on the worker's event loop, sync
//! handlers run on the bounded blocking pool.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::io::Write;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use nimbus_registry::{FunctionSpec, HandlerKind};

use crate::error::ExecutionError;

/// A resolved, invocable function handler
#[async_trait]
pub trait FunctionHandler: Send + Sync {
    /// Calling convention declared for this handler
    fn kind(&self) -> HandlerKind;

    /// Async convention: awaited directly on the worker loop
    async fn invoke(&self, payload: JsonValue) -> Result<JsonValue, ExecutionError>;

    /// Sync convention: executed on the bounded blocking pool
    fn invoke_blocking(&self, payload: JsonValue) -> Result<JsonValue, ExecutionError>;
}

/// Resolves a function spec into a handler
#[async_trait]
pub trait HandlerResolver: Send + Sync {
    async fn resolve(&self, spec: &FunctionSpec) -> Result<Arc<dyn FunctionHandler>, ExecutionError>;
}

/// Default resolver: the handler is the project's own runtime invoked as a
/// subprocess: `runtime.command + [source_path]`, payload JSON on stdin,
/// result read from stdout. Keeps the control plane's type system out of
/// user code entirely.
pub struct CommandResolver {
    command: Vec<String>,
    env: HashMap<String, String>,
}

impl CommandResolver {
    pub fn new(command: Vec<String>, env: HashMap<String, String>) -> Self {
        Self { command, env }
    }
}

#[async_trait]
impl HandlerResolver for CommandResolver {
    async fn resolve(&self, spec: &FunctionSpec) -> Result<Arc<dyn FunctionHandler>, ExecutionError> {
        if !spec.source.exists() {
            return Err(ExecutionError::FunctionNotFound {
                project: spec.project.clone(),
                function: spec.name.clone(),
            });
        }

        debug!(
            "Resolved handler for {}/{} ({:?})",
            spec.project, spec.name, spec.kind
        );

        Ok(Arc::new(CommandHandler {
            command: self.command.clone(),
            source: spec.source.to_string_lossy().into_owned(),
            entry: spec.entry.clone(),
            env: self.env.clone(),
            kind: spec.kind,
        }))
    }
}

struct CommandHandler {
    command: Vec<String>,
    source: String,
    entry: String,
    env: HashMap<String, String>,
    kind: HandlerKind,
}

impl CommandHandler {
    fn interpret_output(status_ok: bool, stdout: &[u8], stderr: &[u8]) -> Result<JsonValue, ExecutionError> {
        if !status_ok {
            let stderr = String::from_utf8_lossy(stderr);
            let message = stderr.trim();
            let message = if message.is_empty() {
                String::from_utf8_lossy(stdout).trim().to_string()
            } else {
                message.to_string()
            };
            return Err(ExecutionError::FunctionFailed(message));
        }

        let stdout = String::from_utf8_lossy(stdout);
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            return Ok(JsonValue::Null);
        }

        // Structured output when the handler prints JSON, raw text otherwise
        Ok(serde_json::from_str(trimmed).unwrap_or_else(|_| JsonValue::String(trimmed.to_string())))
    }
}

#[async_trait]
impl FunctionHandler for CommandHandler {
    fn kind(&self) -> HandlerKind {
        self.kind
    }

    async fn invoke(&self, payload: JsonValue) -> Result<JsonValue, ExecutionError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| ExecutionError::ConfigurationError("empty runtime command".to_string()))?;

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .arg(&self.source)
            .env("NIMBUS_ENTRY_POINT", &self.entry)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExecutionError::FunctionFailed(format!("failed to start handler: {}", e)))?;

        let frame = serde_json::to_vec(&payload)
            .map_err(|e| ExecutionError::FunctionFailed(format!("payload not serializable: {}", e)))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&frame)
                .await
                .map_err(|e| ExecutionError::FunctionFailed(format!("failed to write payload: {}", e)))?;
            // Drop closes the pipe so the handler sees EOF
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ExecutionError::FunctionFailed(format!("handler wait failed: {}", e)))?;

        Self::interpret_output(output.status.success(), &output.stdout, &output.stderr)
    }

    fn invoke_blocking(&self, payload: JsonValue) -> Result<JsonValue, ExecutionError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| ExecutionError::ConfigurationError("empty runtime command".to_string()))?;

        let mut child = std::process::Command::new(program)
            .args(args)
            .arg(&self.source)
            .env("NIMBUS_ENTRY_POINT", &self.entry)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExecutionError::FunctionFailed(format!("failed to start handler: {}", e)))?;

        let frame = serde_json::to_vec(&payload)
            .map_err(|e| ExecutionError::FunctionFailed(format!("payload not serializable: {}", e)))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&frame)
                .map_err(|e| ExecutionError::FunctionFailed(format!("failed to write payload: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| ExecutionError::FunctionFailed(format!("handler wait failed: {}", e)))?;

        Self::interpret_output(output.status.success(), &output.stdout, &output.stderr)
    }
}

/// In-process resolver backed by closures, for embedded functions and
/// tests; no subprocess involved.
#[derive(Default)]
pub struct StaticResolver {
    handlers: HashMap<String, Arc<dyn FunctionHandler>>,
}

type StaticFn = dyn Fn(JsonValue) -> Result<JsonValue, String> + Send + Sync;

struct StaticHandler {
    kind: HandlerKind,
    func: Arc<StaticFn>,
}

#[async_trait]
impl FunctionHandler for StaticHandler {
    fn kind(&self) -> HandlerKind {
        self.kind
    }

    async fn invoke(&self, payload: JsonValue) -> Result<JsonValue, ExecutionError> {
        (self.func)(payload).map_err(ExecutionError::FunctionFailed)
    }

    fn invoke_blocking(&self, payload: JsonValue) -> Result<JsonValue, ExecutionError> {
        (self.func)(payload).map_err(ExecutionError::FunctionFailed)
    }
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure under a function name
    pub fn register<F>(&mut self, name: impl Into<String>, kind: HandlerKind, func: F)
    where
        F: Fn(JsonValue) -> Result<JsonValue, String> + Send + Sync + 'static,
    {
        self.handlers.insert(
            name.into(),
            Arc::new(StaticHandler {
                kind,
                func: Arc::new(func),
            }),
        );
    }
}

#[async_trait]
impl HandlerResolver for StaticResolver {
    async fn resolve(&self, spec: &FunctionSpec) -> Result<Arc<dyn FunctionHandler>, ExecutionError> {
        self.handlers
            .get(&spec.name)
            .cloned()
            .ok_or_else(|| ExecutionError::FunctionNotFound {
                project: spec.project.clone(),
                function: spec.name.clone(),
            })
    }
}
