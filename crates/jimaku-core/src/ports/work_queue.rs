//! Port for the durable work queue: typed work units with leases,
//! retry accounting, and a dead-letter log.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::options::{EnrichOptions, TranscribeOptions};
use crate::domain::task::TaskId;

/// Errors surfaced by queue implementations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue storage error: {0}")]
    Storage(String),

    #[error("work unit payload error: {0}")]
    Payload(String),
}

/// Which stage a work unit drives. Doubles as the queue name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkKind {
    Download,
    Transcribe,
    Enrich,
}

impl WorkKind {
    /// Queue/topic name for this kind.
    #[must_use]
    pub const fn queue_name(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Transcribe => "transcribe",
            Self::Enrich => "enrich",
        }
    }
}

/// A queue message driving one stage for one task.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkUnit {
    pub kind: WorkKind,
    pub task_id: TaskId,
    /// Delivery attempt, 1-based.
    pub attempt: u32,
    /// Kind-specific payload (one of the `*Payload` structs).
    pub payload: serde_json::Value,
}

/// Payload of a `Download` work unit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadPayload {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir_hint: Option<String>,
}

/// Payload of a `Transcribe` work unit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TranscribePayload {
    /// Blob key or local path of the audio.
    pub audio_ref: String,
    pub options: TranscribeOptions,
}

/// Payload of an `Enrich` work unit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnrichPayload {
    /// Blob key or local path of the word-level segment JSON.
    pub subtitle_ref: String,
    pub options: EnrichOptions,
}

/// A work unit held under lease by one worker.
///
/// The lease must be settled with exactly one of `ack`, `nack`, or
/// `dead_letter`; a worker that dies instead lets the lease expire and
/// the unit is redelivered.
#[derive(Clone, Debug)]
pub struct LeasedUnit {
    /// Implementation-scoped lease handle.
    pub lease_id: i64,
    pub unit: WorkUnit,
}

/// At-least-once delivery of typed work units.
#[async_trait]
pub trait WorkQueuePort: Send + Sync {
    /// Append a unit to the queue named by `kind`, visible immediately.
    async fn enqueue(
        &self,
        kind: WorkKind,
        task_id: TaskId,
        payload: serde_json::Value,
    ) -> Result<(), QueueError>;

    /// Lease the next visible unit of `kind`, if any. The unit becomes
    /// invisible to other workers for `visibility`; an expired lease
    /// makes it deliverable again with an incremented attempt.
    async fn lease(
        &self,
        kind: WorkKind,
        visibility: Duration,
    ) -> Result<Option<LeasedUnit>, QueueError>;

    /// Settle a lease as succeeded; the unit is removed.
    async fn ack(&self, lease_id: i64) -> Result<(), QueueError>;

    /// Settle a lease as failed-but-retryable; the unit becomes visible
    /// again after `retry_after`. Returns the attempt count the next
    /// delivery will carry.
    async fn nack(&self, lease_id: i64, retry_after: Duration) -> Result<u32, QueueError>;

    /// Settle a lease as exhausted: move the unit to the dead-letter log.
    async fn dead_letter(&self, lease_id: i64, error: &str) -> Result<(), QueueError>;
}

impl WorkUnit {
    /// Decode the kind-specific payload.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, QueueError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| QueueError::Payload(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn queue_names_match_topic_layout() {
        assert_eq!(WorkKind::Download.queue_name(), "download");
        assert_eq!(WorkKind::Transcribe.queue_name(), "transcribe");
        assert_eq!(WorkKind::Enrich.queue_name(), "enrich");
    }

    #[test]
    fn payload_roundtrip() {
        let unit = WorkUnit {
            kind: WorkKind::Transcribe,
            task_id: Uuid::new_v4(),
            attempt: 1,
            payload: serde_json::to_value(TranscribePayload {
                audio_ref: "title/audio.mp3".into(),
                options: TranscribeOptions::default(),
            })
            .unwrap(),
        };
        let decoded: TranscribePayload = unit.payload_as().unwrap();
        assert_eq!(decoded.audio_ref, "title/audio.mp3");
        assert_eq!(decoded.options.model, "large-v3");
    }
}
