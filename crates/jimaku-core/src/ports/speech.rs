//! Port for the ASR engine.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::options::TranscribeOptions;
use crate::domain::segment::Segment;

/// Errors surfaced by speech engine adapters.
#[derive(Debug, Error)]
pub enum SpeechError {
    /// Engine process/service could not be reached (retryable).
    #[error("speech engine unavailable: {0}")]
    Unavailable(String),

    /// Engine ran but produced no usable result.
    #[error("transcription failed: {0}")]
    Failed(String),
}

/// Progress callback: percent of the current engine run plus a short
/// phase message ("loading model", "aligning", ...).
pub type ProgressFn<'a> = &'a (dyn Fn(u8, &str) + Send + Sync);

/// Produces word-timestamped segments from an audio file.
///
/// Engines MUST return word-level timings (forced alignment); the
/// enrichment stage depends on them.
#[async_trait]
pub trait SpeechEnginePort: Send + Sync {
    async fn transcribe(
        &self,
        audio: &Path,
        options: &TranscribeOptions,
        progress: ProgressFn<'_>,
    ) -> Result<Vec<Segment>, SpeechError>;
}
