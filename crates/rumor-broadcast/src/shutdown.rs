//! Shutdown controller for background tasks.
//!
//! Tasks observe the cancellation token cooperatively; nothing is aborted. A
//! task that does not stop within the timeout is left detached.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Owns a cancellation signal and the tasks that listen to it.
#[derive(Debug)]
pub struct ShutdownController {
    token: CancellationToken,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    timeout: Duration,
}

impl ShutdownController {
    /// Create a controller that waits up to `timeout` for each task.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            timeout,
        }
    }

    /// The cancellation signal tasks should select on.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Spawn a task on the current runtime and track it.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name, handle));
    }

    /// Request cancellation and wait for tracked tasks to finish.
    pub async fn shutdown(&self) {
        self.token.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for (name, task) in tasks {
            match tokio::time::timeout(self.timeout, task).await {
                Ok(Ok(())) => debug!(task = name, "Background task stopped"),
                Ok(Err(e)) => warn!(task = name, error = %e, "Background task panicked"),
                Err(_) => warn!(
                    task = name,
                    timeout = ?self.timeout,
                    "Background task did not stop within timeout"
                ),
            }
        }
    }
}
