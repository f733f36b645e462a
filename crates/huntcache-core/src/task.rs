use std::future::Future;

use tokio::task::JoinHandle;
use tracing::warn;

/// Handle to fire-and-forget work such as revalidation or prefetch.
///
/// Dropping the handle detaches the task; it keeps running to completion,
/// even if the request that started it has gone away.
#[derive(Debug)]
#[must_use = "drop the handle to detach the task, or call wait() to observe it"]
pub struct BackgroundTask {
    label: &'static str,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    /// Spawn onto the current tokio runtime
    pub fn spawn<F>(label: &'static str, work: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            label,
            handle: tokio::spawn(work),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the task at its next suspension point
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Wait for the task. Returns false if it was aborted or panicked.
    pub async fn wait(self) -> bool {
        match self.handle.await {
            Ok(()) => true,
            Err(e) => {
                if !e.is_cancelled() {
                    warn!(task = self.label, error = %e, "Background task panicked");
                }
                false
            }
        }
    }

    /// Let the task run on unobserved
    pub fn detach(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_detached_task_still_runs() {
        let ran = Arc::new(AtomicBool::new(false));
        let (tx, rx) = tokio::sync::oneshot::channel();
        let flag = ran.clone();
        BackgroundTask::spawn("test", async move {
            flag.store(true, Ordering::SeqCst);
            let _ = tx.send(());
        })
        .detach();

        rx.await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_abort() {
        let task = BackgroundTask::spawn("pending", std::future::pending());
        task.abort();
        assert!(!task.wait().await);
    }
}
