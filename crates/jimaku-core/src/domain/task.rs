//! Durable task model: status, type, and relation edges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Task identifier (128-bit UUID, primary key in the task store).
pub type TaskId = Uuid;

/// Lifecycle status of a task.
///
/// Transitions are `Pending -> Running -> {Completed, Failed, Cancelled}`
/// with no back-edges. A task that fails before its worker ever marked it
/// running (e.g. retries exhausted while re-queued) may go
/// `Pending -> Failed` directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, waiting for a worker.
    Pending,
    /// A worker is executing the task.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled before completion.
    Cancelled,
}

impl TaskStatus {
    /// Convert to string representation for database storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            // "pending" or unknown values default to Pending
            _ => Self::Pending,
        }
    }

    /// Whether this status is final.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a transition to `next` is legal.
    ///
    /// Same-status writes are allowed (they are no-ops for the status
    /// column); terminal states accept no further transitions.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        if *self == next {
            return true;
        }
        match self {
            Self::Pending => matches!(next, Self::Running | Self::Failed | Self::Cancelled),
            Self::Running => matches!(next, Self::Completed | Self::Failed | Self::Cancelled),
            Self::Completed | Self::Failed | Self::Cancelled => false,
        }
    }
}

/// What kind of work a task represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// The user-visible task created by the analyze endpoint.
    Root,
    Download,
    Transcribe,
    Enrich,
}

impl TaskType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Download => "download",
            Self::Transcribe => "transcribe",
            Self::Enrich => "enrich",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "root" => Some(Self::Root),
            "download" => Some(Self::Download),
            "transcribe" => Some(Self::Transcribe),
            "enrich" => Some(Self::Enrich),
            _ => None,
        }
    }
}

/// Typed directed edge between tasks.
///
/// The forward kinds point from the root to its stage children; `Root`
/// is the reverse child-to-parent kind. Unique per `(from, kind)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Download,
    Transcribe,
    Enrich,
    /// Child -> parent back-edge.
    Root,
}

impl EdgeKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Transcribe => "transcribe",
            Self::Enrich => "enrich",
            Self::Root => "root",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "download" => Some(Self::Download),
            "transcribe" => Some(Self::Transcribe),
            "enrich" => Some(Self::Enrich),
            "root" => Some(Self::Root),
            _ => None,
        }
    }
}

/// A durable unit of work as persisted by the task store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub task_type: TaskType,
    /// Percent complete of this task, 0..=100.
    pub progress: u8,
    /// Short human-readable status line.
    pub message: String,
    /// Error string; non-empty exactly when `status` is `Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Blob key or local path of this task's output artifact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,
    pub queued_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Source media URL (root tasks only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

impl TaskRecord {
    /// Create a fresh pending record with `queued_at` set to now.
    #[must_use]
    pub fn new(task_type: TaskType, source_url: Option<String>) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            status: TaskStatus::Pending,
            task_type,
            progress: 0,
            message: String::new(),
            error: None,
            output_ref: None,
            queued_at: Some(Utc::now()),
            started_at: None,
            completed_at: None,
            source_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), status);
        }
        assert_eq!(TaskStatus::parse("garbage"), TaskStatus::Pending);
    }

    #[test]
    fn no_back_edges_from_terminal_states() {
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Cancelled.can_transition_to(TaskStatus::Running));
    }

    #[test]
    fn forward_transitions_allowed() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Failed));
    }

    #[test]
    fn same_status_write_is_legal() {
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Running));
    }

    #[test]
    fn edge_kind_roundtrip() {
        for kind in [
            EdgeKind::Download,
            EdgeKind::Transcribe,
            EdgeKind::Enrich,
            EdgeKind::Root,
        ] {
            assert_eq!(EdgeKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EdgeKind::parse("sideways"), None);
    }

    #[test]
    fn new_record_is_pending_with_queued_at() {
        let record = TaskRecord::new(TaskType::Root, Some("https://example.com/v".into()));
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.progress, 0);
        assert!(record.queued_at.is_some());
        assert!(record.started_at.is_none());
    }
}
