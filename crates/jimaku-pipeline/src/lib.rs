//! The jimaku pipeline engine: the three stage workers (download,
//! transcribe, enrich), the coordinator that chains them, and the
//! adapters for the external engines (yt-dlp, whisper CLI, OpenAI-style
//! chat endpoint, ffmpeg slicing).

#![deny(unsafe_code)]

pub mod adapters;
mod cache_util;
pub mod coordinator;
pub mod dictionary;
pub mod download;
pub mod enrich;
pub mod handlers;
mod progress;
pub mod transcribe;

#[cfg(test)]
pub(crate) mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use jimaku_core::{
    BlobStorePort, ChatCompletionPort, EnrichOptions, MediaDownloaderPort, SpeechEnginePort,
    StepCachePort, TaskStorePort, TranscribeOptions, WorkQueuePort,
};

pub use adapters::ffmpeg::AudioSlicer;
pub use coordinator::Coordinator;
pub use dictionary::DictionaryService;

/// Pipeline-wide settings resolved at process start.
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    /// Scratch directory for downloads and materialized blobs.
    pub work_dir: PathBuf,
    /// Default chat model when a request does not pin one.
    pub llm_model: String,
    pub transcribe: TranscribeOptions,
    pub enrich: EnrichOptions,
}

impl PipelineSettings {
    #[must_use]
    pub fn new(work_dir: impl Into<PathBuf>, llm_model: impl Into<String>) -> Self {
        Self {
            work_dir: work_dir.into(),
            llm_model: llm_model.into(),
            transcribe: TranscribeOptions::default(),
            enrich: EnrichOptions::default(),
        }
    }
}

/// Every dependency the stages and the HTTP tier need, created once at
/// process start and threaded into handlers. No process-wide singletons.
pub struct Services {
    pub tasks: Arc<dyn TaskStorePort>,
    pub blob: Arc<dyn BlobStorePort>,
    pub cache: Arc<dyn StepCachePort>,
    pub queue: Arc<dyn WorkQueuePort>,
    pub media: Arc<dyn MediaDownloaderPort>,
    pub speech: Arc<dyn SpeechEnginePort>,
    pub chat: Arc<dyn ChatCompletionPort>,
    pub slicer: Arc<dyn AudioSlicer>,
    pub settings: PipelineSettings,
}
