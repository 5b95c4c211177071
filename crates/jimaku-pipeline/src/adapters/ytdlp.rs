//! yt-dlp subprocess adapter for the media downloader port.
//!
//! Metadata comes from `--dump-single-json`; downloads use the audio
//! extraction postprocessor (mp3 @ 192k) with a line-oriented progress
//! template parsed off stdout.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use jimaku_core::ports::media::ByteProgressFn;
use jimaku_core::{MediaDownloaderPort, MediaError, MediaMetadata};

const PROGRESS_PREFIX: &str = "JMK-PROGRESS";

/// Extensions a finished download may land with.
const DOWNLOADED_EXTENSIONS: &[&str] = &["mp3", "m4a", "mp4", "webm", "ogg", "opus"];

pub struct YtDlpDownloader {
    binary: PathBuf,
}

impl YtDlpDownloader {
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Locate `yt-dlp` on PATH.
    pub fn discover() -> anyhow::Result<Self> {
        let binary = which::which("yt-dlp")?;
        Ok(Self { binary })
    }
}

#[async_trait]
impl MediaDownloaderPort for YtDlpDownloader {
    async fn probe(&self, url: &str) -> Result<MediaMetadata, MediaError> {
        let output = Command::new(&self.binary)
            .args(["--dump-single-json", "--no-playlist", "--no-warnings", url])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| MediaError::UnreachableUrl(format!("yt-dlp: {e}")))?;

        if !output.status.success() {
            return Err(MediaError::UnreachableUrl(last_stderr_line(&output.stderr)));
        }

        let info: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| MediaError::UnreachableUrl(format!("bad metadata: {e}")))?;
        Ok(MediaMetadata {
            title: info["title"].as_str().unwrap_or("media").to_string(),
            duration_seconds: info["duration"].as_f64(),
        })
    }

    async fn download_audio(
        &self,
        url: &str,
        dest_dir: &Path,
        progress: ByteProgressFn<'_>,
    ) -> Result<PathBuf, MediaError> {
        let output_template = dest_dir.join("%(title).200s.%(ext)s");
        let progress_template = format!(
            "download:{PROGRESS_PREFIX} %(progress.downloaded_bytes)s %(progress.total_bytes)s"
        );

        let mut child = Command::new(&self.binary)
            .args([
                "--no-playlist",
                "--no-warnings",
                "--newline",
                "-f",
                "bestaudio[ext=m4a]/bestaudio[ext=mp3]/bestaudio/best",
                "-x",
                "--audio-format",
                "mp3",
                "--audio-quality",
                "192K",
                "--progress-template",
                progress_template.as_str(),
                "-o",
            ])
            .arg(&output_template)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MediaError::Interrupted(format!("yt-dlp: {e}")))?;

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some((downloaded, total)) = parse_progress_line(&line) {
                    progress(downloaded, total);
                }
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| MediaError::Interrupted(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Extraction happens after the transfer; its failures are
            // not worth a re-download.
            if stderr.contains("ffmpeg") || stderr.contains("Postprocessing") {
                return Err(MediaError::Transcode(last_stderr_line(&output.stderr)));
            }
            return Err(MediaError::Interrupted(last_stderr_line(&output.stderr)));
        }

        newest_download(dest_dir).ok_or_else(|| {
            MediaError::Transcode("yt-dlp finished but produced no audio file".to_string())
        })
    }
}

/// Parse one `--progress-template` line into `(downloaded, total)`.
fn parse_progress_line(line: &str) -> Option<(u64, u64)> {
    let rest = line.trim().strip_prefix(PROGRESS_PREFIX)?;
    let mut parts = rest.split_whitespace();
    let downloaded = parts.next()?.parse().ok()?;
    // Sources without a length report "NA".
    let total = parts.next().and_then(|t| t.parse().ok()).unwrap_or(0);
    Some((downloaded, total))
}

fn last_stderr_line(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("unknown error")
        .to_string()
}

/// The most recently modified audio file in the directory.
fn newest_download(dir: &Path) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| DOWNLOADED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        })
        .collect();
    candidates.sort_by_key(|p| std::fs::metadata(p).and_then(|m| m.modified()).ok());
    candidates.pop()
}
