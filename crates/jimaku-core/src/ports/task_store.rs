//! Port for the durable task store (task rows + relation edges).

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::task::{EdgeKind, TaskId, TaskRecord, TaskStatus, TaskType};

/// Errors surfaced by task store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// The write violated the status transition rules.
    #[error("illegal status transition: {from:?} -> {to:?}")]
    IllegalTransition { from: TaskStatus, to: TaskStatus },

    #[error("task store unavailable: {0}")]
    Storage(String),
}

/// Partial update applied atomically to a task row.
///
/// Fields left as `None` are untouched. Setting a non-empty `error`
/// forces the status to `Failed`; the store stamps `started_at` /
/// `completed_at` on the corresponding transitions.
#[derive(Clone, Debug, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub output_ref: Option<String>,
}

impl TaskUpdate {
    #[must_use]
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Progress + message update, the common heartbeat from stage workers.
    #[must_use]
    pub fn progress(progress: u8, message: impl Into<String>) -> Self {
        Self {
            progress: Some(progress),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Terminal success with the output artifact reference.
    #[must_use]
    pub fn completed(message: impl Into<String>, output_ref: impl Into<String>) -> Self {
        Self {
            status: Some(TaskStatus::Completed),
            progress: Some(100),
            message: Some(message.into()),
            output_ref: Some(output_ref.into()),
            ..Self::default()
        }
    }

    /// Terminal failure carrying the error string.
    #[must_use]
    pub fn failed(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: Some(TaskStatus::Failed),
            error: Some(error.into()),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_output_ref(mut self, output_ref: impl Into<String>) -> Self {
        self.output_ref = Some(output_ref.into());
        self
    }
}

/// Durable persistence of task rows and task-relation edges.
///
/// Implementations MUST enforce the status transition rules at write
/// time and serialize writes to a single task.
#[async_trait]
pub trait TaskStorePort: Send + Sync {
    /// Create a new pending task, returning its id.
    async fn create_task(
        &self,
        task_type: TaskType,
        source_url: Option<&str>,
    ) -> Result<TaskId, StoreError>;

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError>;

    /// Apply `update` atomically and return the status the task had
    /// before the write (callers use it for idempotency checks).
    async fn update(&self, id: TaskId, update: TaskUpdate) -> Result<TaskStatus, StoreError>;

    /// Upsert the edge `(from, kind) -> to`. Writing the same triple
    /// twice is a no-op; a different `to` overwrites the previous one.
    async fn set_edge(&self, from: TaskId, kind: EdgeKind, to: TaskId) -> Result<(), StoreError>;

    async fn get_edge(&self, from: TaskId, kind: EdgeKind) -> Result<Option<TaskId>, StoreError>;

    /// Reverse lookup: all `from` tasks holding an edge of `kind`
    /// pointing at `to`.
    async fn edges_by_kind(&self, kind: EdgeKind, to: TaskId) -> Result<Vec<TaskId>, StoreError>;

    /// Delete terminal tasks (and their edges) older than the cutoff.
    /// Returns the number of tasks removed.
    async fn prune_completed(&self, older_than_days: u32) -> Result<u64, StoreError>;
}
