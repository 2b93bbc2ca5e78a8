//! Bounded-concurrency worker pool
//!
//! Dispatches independent transform tasks up to a concurrency limit. A
//! failing task never cancels its peers: the pool drains everything,
//! logs every failure, and surfaces the first one. Files whose tasks
//! succeeded stay written even when the build as a whole fails.

use crate::error::{RefractError, RefractResult};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

/// A queued unit of work
pub type Task = Pin<Box<dyn Future<Output = RefractResult<()>> + Send + 'static>>;

/// Bounded-concurrency task runner
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run every task, at most `concurrency` at once
    ///
    /// All tasks are driven to completion regardless of failures; the
    /// first failure (in completion order) is returned.
    pub async fn run_all(&self, tasks: Vec<Task>) -> RefractResult<()> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut set = JoinSet::new();

        for task in tasks {
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| RefractError::invariant("worker semaphore closed"))?;
                task.await
            });
        }

        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(join_err) => Err(RefractError::TaskPanic(join_err.to_string())),
            };
            if let Err(e) = outcome {
                warn!("Worker task failed: {}", e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
