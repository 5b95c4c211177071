//! whisper-CLI adapter for the speech engine port.
//!
//! Runs a whisperx-style command that writes word-aligned JSON next to
//! a temporary output directory, then converts the result (seconds) to
//! the millisecond segment model. Progress is coarse: the CLI gives no
//! live feedback, so the adapter reports phase milestones.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use jimaku_core::ports::speech::ProgressFn;
use jimaku_core::{Segment, SpeechEnginePort, SpeechError, TranscribeOptions, WordSpan};

pub struct WhisperCliEngine {
    binary: PathBuf,
    /// Model cache directory handed to the CLI.
    model_dir: Option<PathBuf>,
}

impl WhisperCliEngine {
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>, model_dir: Option<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            model_dir,
        }
    }

    /// Locate `whisperx` on PATH.
    pub fn discover(model_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let binary = which::which("whisperx")?;
        Ok(Self { binary, model_dir })
    }
}

#[async_trait]
impl SpeechEnginePort for WhisperCliEngine {
    async fn transcribe(
        &self,
        audio: &Path,
        options: &TranscribeOptions,
        progress: ProgressFn<'_>,
    ) -> Result<Vec<Segment>, SpeechError> {
        let out_dir = std::env::temp_dir().join(format!("jimaku-asr-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&out_dir)
            .await
            .map_err(|e| SpeechError::Unavailable(e.to_string()))?;

        progress(10, "loading speech model");

        let mut command = Command::new(&self.binary);
        command
            .arg(audio)
            .args(["--model", options.model.as_str()])
            .args(["--device", options.device.as_str()])
            .args(["--compute_type", options.compute_type.as_str()])
            .arg("--batch_size")
            .arg(options.batch_size.to_string())
            .args(["--output_format", "json"])
            .arg("--output_dir")
            .arg(&out_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        if options.language != "auto" {
            command.args(["--language", options.language.as_str()]);
        }
        if let Some(model_dir) = &self.model_dir {
            command.arg("--model_dir").arg(model_dir);
        }

        progress(30, "transcribing audio");
        let output = command
            .output()
            .await
            .map_err(|e| SpeechError::Unavailable(format!("whisper: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let _ = tokio::fs::remove_dir_all(&out_dir).await;
            return Err(SpeechError::Failed(
                stderr.lines().last().unwrap_or("whisper failed").to_string(),
            ));
        }

        progress(80, "collecting aligned segments");
        let stem = audio
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("audio");
        let result_path = out_dir.join(format!("{stem}.json"));
        let bytes = tokio::fs::read(&result_path).await.map_err(|e| {
            SpeechError::Failed(format!("whisper produced no result JSON: {e}"))
        })?;
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| SpeechError::Failed(format!("bad whisper JSON: {e}")))?;

        let _ = tokio::fs::remove_dir_all(&out_dir).await;
        progress(100, "transcription complete");
        Ok(segments_from_whisper_json(&value))
    }
}

/// Convert whisper JSON (seconds, `word` keys) to the segment model.
fn segments_from_whisper_json(value: &Value) -> Vec<Segment> {
    let mut out = Vec::new();

    for segment in value["segments"].as_array().into_iter().flatten() {
        let text = segment["text"].as_str().unwrap_or("").trim().to_string();
        let words: Vec<WordSpan> = segment["words"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|word| {
                let text = word["word"].as_str()?.trim();
                if text.is_empty() {
                    return None;
                }
                // Alignment occasionally leaves a word untimed; skip it
                // rather than fabricate a span.
                Some(WordSpan {
                    start_time: to_ms(word["start"].as_f64()?),
                    end_time: to_ms(word["end"].as_f64()?),
                    text: text.to_string(),
                })
            })
            .collect();

        if words.is_empty() {
            if text.is_empty() {
                continue;
            }
            // No word timings at all: keep the sentence span.
            out.push(Segment {
                start_time: to_ms(segment["start"].as_f64().unwrap_or(0.0)),
                end_time: to_ms(segment["end"].as_f64().unwrap_or(0.0)),
                text,
                translation: None,
                word_segments: Vec::new(),
                tokens: Vec::new(),
            });
            continue;
        }

        out.push(Segment {
            start_time: words.first().map_or(0, |w| w.start_time),
            end_time: words.last().map_or(0, |w| w.end_time),
            text,
            translation: None,
            word_segments: words,
            tokens: Vec::new(),
        });
    }
    out
}

fn to_ms(seconds: f64) -> i64 {
    (seconds * 1000.0) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_words_to_millisecond_spans() {
        let value = json!({
            "segments": [{
                "start": 0.0, "end": 1.2, "text": " 母親が ",
                "words": [
                    {"word": "母親", "start": 0.0, "end": 0.48},
                    {"word": "が", "start": 0.48, "end": 0.61}
                ]
            }]
        });
        let segments = segments_from_whisper_json(&value);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "母親が");
        assert_eq!(segments[0].word_segments.len(), 2);
        assert_eq!(segments[0].word_segments[0].end_time, 480);
        assert_eq!(segments[0].start_time, 0);
        assert_eq!(segments[0].end_time, 610);
    }

    #[test]
    fn untimed_words_are_skipped() {
        let value = json!({
            "segments": [{
                "start": 0.0, "end": 1.0, "text": "a b",
                "words": [
                    {"word": "a", "start": 0.0, "end": 0.4},
                    {"word": "b"}
                ]
            }]
        });
        let segments = segments_from_whisper_json(&value);
        assert_eq!(segments[0].word_segments.len(), 1);
    }

    #[test]
    fn wordless_segments_keep_the_sentence_span() {
        let value = json!({
            "segments": [
                {"start": 2.0, "end": 3.5, "text": "hello", "words": []},
                {"start": 4.0, "end": 4.5, "text": "", "words": []}
            ]
        });
        let segments = segments_from_whisper_json(&value);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].start_time, 2000);
        assert!(segments[0].word_segments.is_empty());
    }

    #[test]
    fn empty_payload_is_empty() {
        assert!(segments_from_whisper_json(&json!({})).is_empty());
    }
}
