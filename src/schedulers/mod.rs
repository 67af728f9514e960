//! Scheduler abstraction and the default bounded worker pool.
//!
//! The runtime only needs one capability from its scheduler: run a
//! parameterless task at most once, asynchronously, without letting one
//! task's failure poison another. [`WorkerPool`] is the default
//! implementation, bounding concurrency with a semaphore over tokio's
//! spawner; the cap defaults to the machine's available parallelism.

use futures_util::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Asynchronous task launcher used by the runtime.
///
/// Implementations must isolate task failures: a panicking task may not
/// affect other tasks or the scheduler itself.
pub trait Scheduler: Send + Sync + 'static {
    /// Asynchronously invoke `task` at most once.
    fn start(&self, task: BoxFuture<'static, ()>);
}

/// Bounded-concurrency worker pool over the tokio runtime.
///
/// Tasks are spawned immediately but each awaits a semaphore permit before
/// doing work, so at most the configured number run at once. Panics are
/// contained by the spawned task boundary and logged.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    limit: usize,
}

impl WorkerPool {
    /// A pool running at most `limit` tasks concurrently.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        WorkerPool {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// A pool sized to the number of available CPU cores.
    #[must_use]
    pub fn with_available_parallelism() -> Self {
        let limit = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(limit)
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::with_available_parallelism()
    }
}

impl Scheduler for WorkerPool {
    fn start(&self, task: BoxFuture<'static, ()>) {
        let permits = Arc::clone(&self.permits);
        let handle = tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                // Semaphore closed: the pool is shutting down.
                return;
            };
            task.await;
        });
        drop(handle);
    }
}
