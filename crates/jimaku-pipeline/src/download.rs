//! Download stage: URL -> audio blob.
//!
//! Probes the media for its title, derives a sanitized working
//! directory, short-circuits on a pre-existing audio artifact, and
//! otherwise downloads the best audio track with byte-level progress
//! mapped onto this stage's 0..=100.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use jimaku_core::{
    BlobStorePort, DownloadPayload, MediaDownloaderPort, PipelineError, TaskId,
    sanitize::sanitize_filename,
};

use crate::Services;
use crate::progress::TaskProgress;

/// Audio extensions recognized by the pre-existing artifact probe.
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "mp4", "webm", "ogg", "opus"];

pub struct DownloadStage {
    services: Arc<Services>,
}

impl DownloadStage {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    /// Run the stage; returns the blob key of the audio artifact.
    pub async fn run(
        &self,
        task_id: TaskId,
        payload: &DownloadPayload,
    ) -> Result<String, PipelineError> {
        let services = &self.services;
        let progress = TaskProgress::start(services.tasks.clone(), task_id);
        progress.set(1, "extracting media metadata");

        let metadata = services.media.probe(&payload.url).await?;
        let title = sanitize_filename(&metadata.title);

        let base_dir = payload
            .work_dir_hint
            .as_ref()
            .map_or_else(|| services.settings.work_dir.clone(), PathBuf::from);
        let work_dir = base_dir.join(&title);
        tokio::fs::create_dir_all(&work_dir)
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))?;

        let audio_path = match find_existing_audio(&work_dir, &title) {
            Some(existing) => {
                tracing::info!(task_id = %task_id, path = %existing.display(), "reusing existing audio");
                progress.set(90, "found existing audio");
                existing
            }
            None => {
                let hook = |downloaded: u64, total: u64| {
                    let percent = if total > 0 {
                        ((downloaded.saturating_mul(100)) / total).min(99) as u8
                    } else {
                        0
                    };
                    progress.set(percent, &format!("downloading audio: {percent}%"));
                };
                services
                    .media
                    .download_audio(&payload.url, &work_dir, &hook)
                    .await?
            }
        };

        progress.set(95, "uploading audio");
        let file_name = audio_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PipelineError::Internal("download produced a nameless file".into()))?;
        let key = format!("{title}/{file_name}");
        services.blob.upload_file(&audio_path, &key).await?;

        progress.finish().await;
        tracing::info!(task_id = %task_id, key, "audio stored");
        Ok(key)
    }
}

/// Probe a working directory for an already-downloaded audio artifact.
///
/// Preference order: exact `<title>.<ext>` match, then any audio file
/// whose name contains the title, then the newest audio file at all.
fn find_existing_audio(work_dir: &Path, title: &str) -> Option<PathBuf> {
    if !work_dir.exists() {
        return None;
    }

    for ext in AUDIO_EXTENSIONS {
        let exact = work_dir.join(format!("{title}.{ext}"));
        if exact.is_file() {
            return Some(exact);
        }
    }

    let mut audio_files: Vec<PathBuf> = std::fs::read_dir(work_dir)
        .ok()?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        })
        .collect();

    if let Some(by_title) = audio_files
        .iter()
        .find(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.contains(title))
        })
        .cloned()
    {
        return Some(by_title);
    }

    audio_files.sort_by_key(|p| {
        std::fs::metadata(p)
            .and_then(|m| m.modified())
            .ok()
    });
    audio_files.pop()
}
