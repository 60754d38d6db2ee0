//! Worker Pool
//!
//! Bounds CPU-bound work per node. Closures run on tokio's blocking threads,
//! at most `workers` at a time, so async workers never stall on chunk math.
//! A closure runs to completion once started.

use crate::error::TaskFault;

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinError;

#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    workers: usize,
}

impl WorkerPool {
    /// # Arguments
    /// * `workers`: Typically set to the number of CPU cores.
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        tracing::info!("Worker pool sized for {} concurrent jobs", workers);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `job` on a blocking thread once a worker slot is free.
    ///
    /// Errors keep their `TaskFault` kind when they carry one; panics become
    /// `Assertion` or `OutOfMemory` faults.
    pub async fn run<F, R>(&self, job: F) -> Result<R, TaskFault>
    where
        F: FnOnce() -> anyhow::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| TaskFault::Runtime(format!("worker pool closed: {}", e)))?;

        let joined = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await;

        match joined {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(TaskFault::from_anyhow(e)),
            Err(e) => Err(fault_from_join(e)),
        }
    }
}

/// Classifies a failed join of a spawned task.
pub fn fault_from_join(err: JoinError) -> TaskFault {
    if err.is_panic() {
        let payload = err.into_panic();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        TaskFault::from_panic(message)
    } else {
        TaskFault::Runtime(format!("task cancelled: {}", err))
    }
}
