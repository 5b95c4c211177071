//! Core domain types and port definitions for jimaku.
//!
//! This crate holds the task model, the subtitle data model, the port
//! traits implemented by adapter crates, and the pure pipeline logic
//! (progress reconciliation, cache-key derivation, filename
//! sanitization). It depends on no adapter crates: persistence, HTTP,
//! and subprocess concerns live behind the ports.

#![deny(unsafe_code)]

pub mod cache_key;
pub mod domain;
pub mod error;
pub mod ports;
pub mod progress;
pub mod sanitize;

pub use domain::options::{EnrichOptions, TranscribeOptions};
pub use domain::segment::{Segment, Token, WordSpan};
pub use domain::task::{EdgeKind, TaskId, TaskRecord, TaskStatus, TaskType};
pub use error::PipelineError;
pub use ports::blob_store::{BlobStorePort, StorageError};
pub use ports::chat::{ChatCompletionPort, ChatError, ChatMessage};
pub use ports::media::{MediaDownloaderPort, MediaError, MediaMetadata};
pub use ports::speech::{SpeechEnginePort, SpeechError};
pub use ports::step_cache::{CacheError, StepCachePort};
pub use ports::task_store::{StoreError, TaskStorePort, TaskUpdate};
pub use ports::work_queue::{
    DownloadPayload, EnrichPayload, LeasedUnit, QueueError, TranscribePayload, WorkKind,
    WorkQueuePort, WorkUnit,
};
pub use progress::{ReconciledState, reconcile};
