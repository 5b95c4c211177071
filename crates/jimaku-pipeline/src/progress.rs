//! Bridging synchronous progress hooks into async task-store updates.
//!
//! Stage code and engine adapters report progress through plain
//! closures; a watch channel decouples them from the async store write,
//! and deduplication keeps one store write per percent step.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use jimaku_core::{TaskId, TaskStorePort, TaskUpdate};

/// Forwards `(percent, message)` updates to the task store.
pub(crate) struct TaskProgress {
    tx: watch::Sender<(u8, String)>,
    handle: JoinHandle<()>,
}

impl TaskProgress {
    pub(crate) fn start(tasks: Arc<dyn TaskStorePort>, task_id: TaskId) -> Self {
        let (tx, mut rx) = watch::channel((0u8, String::new()));
        let handle = tokio::spawn(async move {
            let mut last_written: Option<u8> = None;
            while rx.changed().await.is_ok() {
                let (percent, message) = rx.borrow_and_update().clone();
                if last_written == Some(percent) {
                    continue;
                }
                last_written = Some(percent);
                if let Err(e) = tasks
                    .update(task_id, TaskUpdate::progress(percent, message))
                    .await
                {
                    tracing::debug!(task_id = %task_id, error = %e, "progress write dropped");
                }
            }
        });
        Self { tx, handle }
    }

    /// Report progress; callable from synchronous hook contexts.
    pub(crate) fn set(&self, percent: u8, message: &str) {
        let _ = self.tx.send((percent, message.to_string()));
    }

    /// Stop forwarding and wait for in-flight writes, so a terminal
    /// status update cannot race with a stale progress write.
    pub(crate) async fn finish(self) {
        drop(self.tx);
        let _ = self.handle.await;
    }
}
