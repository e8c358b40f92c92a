//! Tracked fire-and-forget work.
//!
//! Frame handlers and cache invalidations are launched without the caller
//! waiting on them, but shutdown still needs a join point. [`BackgroundTasks`]
//! is a counted set of outstanding tasks that can be drained with a deadline.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

// ---

#[derive(Debug, Clone, Default)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` on the runtime and count it until it finishes.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(task);
    }

    /// Number of tasks still running.
    pub fn outstanding(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every outstanding task, giving up after `timeout`.
    ///
    /// Tasks spawned after this call still run but are no longer awaited by
    /// a later `shutdown`. Returns `false` if the deadline passed first.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        // ---
        self.tracker.close();
        let drained = tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok();

        if drained {
            tracing::debug!("Background tasks drained");
        } else {
            tracing::warn!(
                outstanding = self.tracker.len(),
                timeout_ms = timeout.as_millis() as u64,
                "Timed out waiting for background tasks"
            );
        }
        drained
    }
}

/// Wait up to `timeout` for a long-running task and log how it ended.
///
/// Returns `true` only if the task finished cleanly in time. A task that is
/// still running at the deadline is aborted.
pub async fn join_with_timeout(name: &str, handle: JoinHandle<()>, timeout: Duration) -> bool {
    // ---
    let abort = handle.abort_handle();
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(())) => {
            tracing::debug!(task = name, "Task stopped");
            true
        }
        Ok(Err(e)) => {
            tracing::error!(task = name, error = %e, "Task ended abnormally");
            false
        }
        Err(_) => {
            abort.abort();
            tracing::warn!(
                task = name,
                timeout_ms = timeout.as_millis() as u64,
                "Timed out waiting for task, aborting"
            );
            false
        }
    }
}
