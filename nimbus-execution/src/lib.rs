//! Nimbus Execution Core
//!
//! This crate provides the orchestration machinery: the process-wide
//! coordination registry, the master that supervises per-project worker
//! processes, and the worker-side runtime that loads and dispatches a
//! project's functions.

pub mod coordination;
pub mod dispatch;
pub mod error;
pub mod master;
pub mod resolver;
pub mod worker;

// Re-export main types
pub use coordination::{Component, CoordinationRegistry, WorkerHandle, WorkerSpawnSpec, COMPONENT_SLOTS};
pub use dispatch::SyncDispatcher;
pub use error::ExecutionError;
pub use master::{ApiLayer, Master, MasterState};
pub use resolver::{CommandResolver, FunctionHandler, HandlerResolver, StaticResolver};
pub use worker::{run_worker, WorkerOptions, WorkerRuntime};
