//! Stage-level error taxonomy.
//!
//! Stage workers catch everything at the top of their handler and
//! classify it: transient kinds go back to the queue for retry/backoff,
//! terminal kinds mark the child task Failed and propagate to the root.

use thiserror::Error;

use crate::ports::blob_store::StorageError;
use crate::ports::chat::ChatError;
use crate::ports::media::MediaError;
use crate::ports::speech::SpeechError;
use crate::ports::task_store::StoreError;
use crate::ports::work_queue::QueueError;

/// Error surfaced by a stage handler.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Bad input: malformed URL, unsupported media, missing subtitle file.
    #[error("{0}")]
    Input(String),

    /// External engine unavailable or failing (ASR, LLM, downloader).
    #[error("{0}")]
    Upstream(String),

    /// Blob/task store unavailable.
    #[error("{0}")]
    Storage(String),

    /// LLM response failed validation after the repair budget.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The queue exhausted this unit's delivery attempts.
    #[error("retries exhausted")]
    RetriesExhausted,

    /// Hard per-work-unit time limit exceeded.
    #[error("hard time limit exceeded")]
    Timeout,

    #[error("{0}")]
    Internal(String),
}

impl PipelineError {
    /// Whether the queue should retry this failure.
    ///
    /// Transient kinds re-enter the queue with backoff; everything else
    /// is recorded on the task as a terminal failure.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Upstream(_) | Self::Storage(_))
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::Input(format!("task not found: {id}")),
            // An illegal transition means another worker already finished
            // this task; not retryable.
            StoreError::IllegalTransition { from, to } => {
                Self::Internal(format!("illegal status transition {from:?} -> {to:?}"))
            }
            StoreError::Storage(msg) => Self::Storage(msg),
        }
    }
}

impl From<StorageError> for PipelineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => Self::Input(format!("blob not found: {key}")),
            StorageError::Unavailable(msg) => Self::Storage(msg),
            StorageError::PermissionDenied(msg) => Self::Storage(format!("permission: {msg}")),
        }
    }
}

impl From<QueueError> for PipelineError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Storage(msg) => Self::Storage(msg),
            QueueError::Payload(msg) => Self::Input(format!("bad work unit payload: {msg}")),
        }
    }
}

impl From<SpeechError> for PipelineError {
    fn from(err: SpeechError) -> Self {
        match err {
            SpeechError::Unavailable(msg) => Self::Upstream(format!("asr: {msg}")),
            SpeechError::Failed(msg) => Self::Input(format!("asr: {msg}")),
        }
    }
}

impl From<ChatError> for PipelineError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Unavailable(msg) => Self::Upstream(format!("llm: {msg}")),
            ChatError::Rejected(msg) => Self::Input(format!("llm rejected request: {msg}")),
            ChatError::Empty => Self::Upstream("llm returned an empty response".to_string()),
        }
    }
}

impl From<MediaError> for PipelineError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::UnreachableUrl(msg) => Self::Input(format!("unreachable URL: {msg}")),
            MediaError::Interrupted(msg) => Self::Upstream(format!("download: {msg}")),
            MediaError::Transcode(msg) => Self::Input(format!("transcode: {msg}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(PipelineError::Upstream("llm down".into()).is_transient());
        assert!(PipelineError::Storage("db locked".into()).is_transient());
        assert!(!PipelineError::Input("bad url".into()).is_transient());
        assert!(!PipelineError::Validation("drop".into()).is_transient());
        assert!(!PipelineError::Timeout.is_transient());
        assert!(!PipelineError::RetriesExhausted.is_transient());
    }

    #[test]
    fn media_errors_classify_per_failure_mode() {
        // Unreachable URL and transcode failures are terminal; an
        // interrupted download is retried by the queue.
        assert!(!PipelineError::from(MediaError::UnreachableUrl("404".into())).is_transient());
        assert!(!PipelineError::from(MediaError::Transcode("no ffmpeg".into())).is_transient());
        assert!(PipelineError::from(MediaError::Interrupted("reset".into())).is_transient());
    }
}
