/// Task tracker for the long-running sign and monitor tasks
///
/// Tasks are tracked by name so one can be stopped on its own, all can be cancelled
/// on shutdown, and the caller can wait for every outcome.
use crate::errors::{AutosignError, AutosignResult};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

struct Tracked {
    abort: AbortHandle,
    /// Taken by `join_all`; the abort handle stays so cancellation still reaches it.
    handle: Option<JoinHandle<AutosignResult<()>>>,
}

pub struct TaskTracker {
    tasks: Arc<Mutex<HashMap<String, Tracked>>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Spawn a tracked task. A running task with the same name is aborted first.
    pub async fn spawn<F>(&self, name: impl Into<String>, future: F)
    where
        F: Future<Output = AutosignResult<()>> + Send + 'static,
    {
        let name = name.into();
        let label = name.clone();
        let mut tasks = self.tasks.lock().await;
        if let Some(old) = tasks.remove(&name) {
            warn!("Aborting existing task '{}' before spawning new one", name);
            old.abort.abort();
        }
        let handle = tokio::spawn(async move {
            let result = future.await;
            match result {
                Ok(()) => info!("Task '{}' finished", label),
                Err(ref e) => error!("Task '{}' failed: {}", label, e),
            }
            result
        });
        tasks.insert(
            name,
            Tracked {
                abort: handle.abort_handle(),
                handle: Some(handle),
            },
        );
    }

    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }

    /// Abort the task called `name`. Returns whether it was tracked.
    pub async fn stop(&self, name: &str) -> bool {
        let Some(task) = self.tasks.lock().await.remove(name) else {
            return false;
        };
        task.abort.abort();
        info!("Stopped task '{}'", name);
        true
    }

    /// Cancel all tracked tasks
    pub async fn cancel_all(&self) {
        let tasks: HashMap<String, Tracked> = {
            let mut guard = self.tasks.lock().await;
            guard.drain().collect()
        };
        let count = tasks.len();
        for (name, task) in tasks {
            task.abort.abort();
            debug!("Cancelled task '{}'", name);
        }
        if count > 0 {
            info!("Cancelled {} tracked tasks", count);
        }
    }

    /// Wait for every task spawned so far and collect their outcomes by name.
    ///
    /// A task that panicked or was cancelled reports an `Internal` error.
    pub async fn join_all(&self) -> Vec<(String, AutosignResult<()>)> {
        let handles: Vec<(String, JoinHandle<AutosignResult<()>>)> = {
            let mut guard = self.tasks.lock().await;
            guard
                .iter_mut()
                .filter_map(|(name, task)| task.handle.take().map(|h| (name.clone(), h)))
                .collect()
        };
        let mut outcomes = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(e) => Err(AutosignError::Internal(anyhow::anyhow!(
                    "task '{}' did not complete: {}",
                    name,
                    e
                ))),
            };
            self.tasks.lock().await.remove(&name);
            outcomes.push((name, outcome));
        }
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));
        outcomes
    }
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new()
    }
}
