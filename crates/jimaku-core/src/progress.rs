//! Progress reconciliation: fold a root task and its stage children
//! into one (status, progress, message) view.
//!
//! Phase bands of the unified progress:
//! download 0..=29, transcribe 30..=69, enrich 70..=99, terminal 100.
//! Pure over the task snapshots; callers re-invoke it on every read.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::task::{TaskId, TaskRecord, TaskStatus};

/// The reconciled, user-visible view of an analyze pipeline.
#[derive(Clone, Debug, Serialize)]
pub struct ReconciledState {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub progress: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Output artifact of the terminal stage, once available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,
}

/// Map a child's local progress into its band of the unified range.
fn band(progress: u8, factor: f64, offset: u8, cap: u8) -> u8 {
    let scaled = offset as u32 + (f64::from(progress) * factor) as u32;
    (scaled as u8).min(cap)
}

fn failed_state(
    root: &TaskRecord,
    progress: u8,
    phase: &str,
    error: Option<&str>,
) -> ReconciledState {
    let error = error.map(str::to_string).or_else(|| root.error.clone());
    ReconciledState {
        task_id: root.task_id,
        status: TaskStatus::Failed,
        progress,
        message: format!("{phase} failed"),
        error,
        queued_at: root.queued_at,
        started_at: root.started_at,
        completed_at: root.completed_at,
        output_ref: root.output_ref.clone(),
    }
}

/// Compute the unified view from the root and its stage children.
///
/// `download`, `transcribe`, `enrich` are the children found through the
/// root's edges; absent children simply have not been created yet.
#[must_use]
pub fn reconcile(
    root: &TaskRecord,
    download: Option<&TaskRecord>,
    transcribe: Option<&TaskRecord>,
    enrich: Option<&TaskRecord>,
) -> ReconciledState {
    let mut state = ReconciledState {
        task_id: root.task_id,
        status: root.status,
        progress: root.progress,
        message: root.message.clone(),
        error: root.error.clone(),
        queued_at: root.queued_at,
        started_at: root.started_at,
        completed_at: root.completed_at,
        output_ref: root.output_ref.clone(),
    };

    // Terminal root states win outright.
    match root.status {
        TaskStatus::Completed => {
            state.progress = 100;
            if state.message.is_empty() {
                state.message = "analysis complete".to_string();
            }
            return state;
        }
        TaskStatus::Failed | TaskStatus::Cancelled => {
            if state.message.is_empty() {
                state.message = state
                    .error
                    .clone()
                    .unwrap_or_else(|| "analysis failed".to_string());
            }
            return state;
        }
        TaskStatus::Pending | TaskStatus::Running => {}
    }

    // A failed child fails the whole view, reported at its phase offset.
    if let Some(d) = download.filter(|d| d.status == TaskStatus::Failed) {
        return failed_state(root, band(d.progress, 0.30, 0, 29), "download", d.error.as_deref());
    }
    if let Some(t) = transcribe.filter(|t| t.status == TaskStatus::Failed) {
        return failed_state(
            root,
            band(t.progress, 0.40, 30, 69),
            "transcription",
            t.error.as_deref(),
        );
    }
    if let Some(e) = enrich.filter(|e| e.status == TaskStatus::Failed) {
        return failed_state(
            root,
            band(e.progress, 0.30, 70, 99),
            "subtitle processing",
            e.error.as_deref(),
        );
    }

    // Most advanced live child decides the band.
    if let Some(e) = enrich {
        match e.status {
            TaskStatus::Completed => {
                // The coordinator will flip the root momentarily.
                state.progress = 100;
                state.message = "analysis complete".to_string();
                state.output_ref = e.output_ref.clone();
                return state;
            }
            TaskStatus::Running | TaskStatus::Pending => {
                state.progress = band(e.progress, 0.30, 70, 99);
                state.message = if e.message.is_empty() {
                    "processing subtitles".to_string()
                } else {
                    e.message.clone()
                };
                return state;
            }
            _ => {}
        }
    }

    if let Some(t) = transcribe {
        match t.status {
            TaskStatus::Completed => {
                state.progress = 70;
                state.message = "transcription complete, processing subtitles".to_string();
                return state;
            }
            TaskStatus::Running | TaskStatus::Pending => {
                state.progress = band(t.progress, 0.40, 30, 69);
                state.message = if t.message.is_empty() {
                    "transcribing".to_string()
                } else {
                    t.message.clone()
                };
                return state;
            }
            _ => {}
        }
    }

    if let Some(d) = download {
        match d.status {
            TaskStatus::Completed => {
                state.progress = 30;
                state.message = "download complete, transcribing".to_string();
                return state;
            }
            TaskStatus::Running => {
                state.progress = band(d.progress, 0.30, 0, 29);
                state.message = if d.message.is_empty() {
                    "downloading audio".to_string()
                } else {
                    d.message.clone()
                };
                return state;
            }
            _ => {}
        }
    }

    // Nothing has started yet.
    state.progress = 0;
    if state.message.is_empty() {
        state.message = "task created, waiting for a worker".to_string();
    }
    state
}
