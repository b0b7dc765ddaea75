//! Task lifecycle manager.
//!
//! Every long-lived task (event loop, pool health checker, connection
//! supervisors, validator sweeper) registers here under an id scoped to
//! the owning instance, so two transports in one process — or in one test
//! binary — can never collide.  `shutdown` joins everything and reports
//! stragglers as leaks.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

#[derive(thiserror::Error, Debug)]
pub enum LifecycleError {
    #[error("task id `{0}` is already registered")]
    DuplicateTask(String),
}

/// Registry of named long-lived tasks for one owning instance.
pub struct TaskRegistry {
    /// Short unique scope prefix, distinct per instance.
    instance: String,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        let instance = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        Self {
            instance,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// The instance scope prefix.
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Spawn a task under `name`.  Names must be unique within the
    /// instance; the returned id is `<instance>/<name>`.
    pub fn spawn<F>(&self, name: &str, fut: F) -> Result<String, LifecycleError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = format!("{}/{}", self.instance, name);
        let mut tasks = self.tasks.lock();
        // Lazily reap tasks that already ran to completion.
        tasks.retain(|_, handle| !handle.is_finished());
        if tasks.contains_key(&id) {
            return Err(LifecycleError::DuplicateTask(id));
        }
        let handle = tokio::spawn(fut);
        tasks.insert(id.clone(), handle);
        Ok(id)
    }

    /// Number of registered tasks that have not finished.
    pub fn active(&self) -> usize {
        self.tasks
            .lock()
            .values()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Wait up to `timeout` for every registered task to exit.  Returns
    /// the ids of tasks that were still running (leaks); those are
    /// aborted before returning.
    pub async fn shutdown(&self, timeout: Duration) -> Vec<String> {
        let handles: Vec<(String, JoinHandle<()>)> = self.tasks.lock().drain().collect();
        let deadline = tokio::time::Instant::now() + timeout;
        let mut leaked = Vec::new();

        for (id, mut handle) in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!(task = %id, "task did not exit before shutdown deadline");
                    handle.abort();
                    leaked.push(id);
                }
            }
        }
        leaked.sort();
        leaked
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
