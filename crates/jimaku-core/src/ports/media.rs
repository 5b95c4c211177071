//! Port for the media downloader (URL -> audio file).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by downloader adapters.
#[derive(Debug, Error)]
pub enum MediaError {
    /// Metadata extraction failed; the URL is bad or the media is gone.
    #[error("unreachable URL: {0}")]
    UnreachableUrl(String),

    /// Download started but did not finish (retryable).
    #[error("download interrupted: {0}")]
    Interrupted(String),

    /// Audio extraction/transcoding failed.
    #[error("transcode failed: {0}")]
    Transcode(String),
}

/// Media metadata from a probe (no download).
#[derive(Clone, Debug)]
pub struct MediaMetadata {
    pub title: String,
    pub duration_seconds: Option<f64>,
}

/// Byte-level progress callback `(downloaded, total)`; `total` may be 0
/// when the source does not report a length.
pub type ByteProgressFn<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

/// Fetches the best-quality audio track of a media URL, transcoded to a
/// standard codec, into a destination directory.
#[async_trait]
pub trait MediaDownloaderPort: Send + Sync {
    /// Extract metadata without downloading.
    async fn probe(&self, url: &str) -> Result<MediaMetadata, MediaError>;

    /// Download + extract audio into `dest_dir`; returns the audio path.
    async fn download_audio(
        &self,
        url: &str,
        dest_dir: &Path,
        progress: ByteProgressFn<'_>,
    ) -> Result<PathBuf, MediaError>;
}
