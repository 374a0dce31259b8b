//! Durable, pollable, cancellable tasks on top of the Nimbus master
//!
//! A task wraps one asynchronous function invocation: created through the
//! API or by a cron firing, executed by a background coroutine against the
//! master, persisted one JSON file per task, and queryable independently of
//! the request that created it.

pub mod error;
pub mod manager;
pub mod schedule;
pub mod scheduler;
pub mod store;
pub mod task;

pub use error::{Result, TaskError};
pub use manager::TaskManager;
pub use schedule::{ScheduleDocument, ScheduledJob};
pub use scheduler::TaskScheduler;
pub use store::TaskStore;
pub use task::{TaskRecord, TaskStatus};
