//! Bounded dispatch pool for synchronous handlers
//!
//! One slow synchronous handler must not stall a worker's command loop, so
//! sync handler bodies run on the blocking pool behind a semaphore.

use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::error::ExecutionError;

/// Semaphore-bounded wrapper around `spawn_blocking`
pub struct SyncDispatcher {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl SyncDispatcher {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Default capacity: bounded by the machine, never unbounded
    pub fn with_default_capacity() -> Self {
        Self::new(num_cpus::get().min(8))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Run a blocking closure, waiting for a permit when the pool is full
    pub async fn dispatch<F, T>(&self, f: F) -> Result<T, ExecutionError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ExecutionError::WorkerError("dispatch pool closed".to_string()))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        })
        .await
        .map_err(|e| ExecutionError::WorkerError(format!("sync handler panicked: {}", e)))
    }
}
