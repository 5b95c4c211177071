//! Port traits for everything the pipeline consumes from outside:
//! persistence, blob storage, the step cache, the work queue, and the
//! three external engines (media downloader, speech, chat LLM).
//!
//! Adapter crates implement these; the pipeline and HTTP layers only
//! ever see the traits.

pub mod blob_store;
pub mod chat;
pub mod media;
pub mod speech;
pub mod step_cache;
pub mod task_store;
pub mod work_queue;
