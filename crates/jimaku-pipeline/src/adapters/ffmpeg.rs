//! Audio slicing for long inputs, backed by ffmpeg/ffprobe.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use jimaku_core::PipelineError;

/// Duration probing and wall-clock chunking of audio files.
#[async_trait]
pub trait AudioSlicer: Send + Sync {
    async fn duration_seconds(&self, audio: &Path) -> Result<f64, PipelineError>;

    /// Split into chunks of at most `chunk_seconds`, returned in order.
    async fn split(
        &self,
        audio: &Path,
        chunk_seconds: u32,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, PipelineError>;
}

pub struct FfmpegSlicer {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegSlicer {
    #[must_use]
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Locate ffmpeg and ffprobe on PATH.
    pub fn discover() -> anyhow::Result<Self> {
        Ok(Self {
            ffmpeg: which::which("ffmpeg")?,
            ffprobe: which::which("ffprobe")?,
        })
    }
}

#[async_trait]
impl AudioSlicer for FfmpegSlicer {
    async fn duration_seconds(&self, audio: &Path) -> Result<f64, PipelineError> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(audio)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| PipelineError::Internal(format!("ffprobe: {e}")))?;

        if !output.status.success() {
            return Err(PipelineError::Input(format!(
                "cannot probe audio duration: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_duration(&String::from_utf8_lossy(&output.stdout))
    }

    async fn split(
        &self,
        audio: &Path,
        chunk_seconds: u32,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        let extension = audio
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp3")
            .to_string();
        let pattern = out_dir.join(format!("chunk_%03d.{extension}"));

        let output = Command::new(&self.ffmpeg)
            .arg("-y")
            .arg("-i")
            .arg(audio)
            .args(["-f", "segment", "-segment_time"])
            .arg(chunk_seconds.to_string())
            .args(["-c", "copy"])
            .arg(&pattern)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| PipelineError::Internal(format!("ffmpeg: {e}")))?;

        if !output.status.success() {
            return Err(PipelineError::Input(format!(
                "transcode: {}",
                String::from_utf8_lossy(&output.stderr)
                    .lines()
                    .last()
                    .unwrap_or("ffmpeg failed")
            )));
        }

        let mut chunks: Vec<PathBuf> = std::fs::read_dir(out_dir)
            .map_err(|e| PipelineError::Storage(e.to_string()))?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("chunk_"))
            })
            .collect();
        chunks.sort();

        if chunks.is_empty() {
            return Err(PipelineError::Input(
                "transcode: segmenting produced no chunks".to_string(),
            ));
        }
        Ok(chunks)
    }
}

fn parse_duration(stdout: &str) -> Result<f64, PipelineError> {
    stdout
        .trim()
        .parse::<f64>()
        .map_err(|_| PipelineError::Input(format!("cannot parse audio duration: {stdout:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ffprobe_duration_output() {
        assert!((parse_duration("1325.78\n").unwrap() - 1325.78).abs() < 1e-6);
        assert!(parse_duration("N/A\n").is_err());
        assert!(parse_duration("").is_err());
    }
}
