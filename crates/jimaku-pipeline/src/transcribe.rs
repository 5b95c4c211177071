//! Transcribe stage: audio blob -> word-timestamped segment JSON.
//!
//! Long audio is chunked by wall-clock duration and transcribed chunk
//! by chunk, sequentially (the engine is the CPU-bound part). Chunk
//! boundaries are not re-aligned; the engine's VAD handles silences.
//! The full segment list is memoized under the ASR cache key.

use std::path::Path;
use std::sync::Arc;

use serde_json::json;

use jimaku_core::cache_key::{NS_ASR, TTL_DOWNLOAD_DERIVED, audio_fingerprint, step_cache_key};
use jimaku_core::ports::blob_store::resolve_to_local;
use jimaku_core::{
    BlobStorePort, PipelineError, Segment, SpeechEnginePort, TaskId, TranscribeOptions,
    TranscribePayload,
};

use crate::adapters::ffmpeg::AudioSlicer;
use crate::progress::TaskProgress;
use crate::{Services, cache_util};

pub struct TranscribeStage {
    services: Arc<Services>,
}

impl TranscribeStage {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    /// Run the stage; returns the blob key of the segment JSON.
    pub async fn run(
        &self,
        task_id: TaskId,
        payload: &TranscribePayload,
    ) -> Result<String, PipelineError> {
        let services = &self.services;
        let progress = TaskProgress::start(services.tasks.clone(), task_id);
        progress.set(5, "preparing audio");

        let scratch = services.settings.work_dir.join("scratch").join(task_id.to_string());
        let audio_path = resolve_to_local(services.blob.as_ref(), &payload.audio_ref, &scratch).await?;

        let audio_bytes = tokio::fs::read(&audio_path)
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))?;
        let fingerprint = audio_fingerprint(&audio_bytes);
        drop(audio_bytes);

        let cache_key = step_cache_key(
            "asr.transcribe",
            &fingerprint,
            &asr_config_subset(&payload.options),
        );

        let segments = match cache_util::get_json::<Vec<Segment>>(
            services.cache.as_ref(),
            NS_ASR,
            &cache_key,
        )
        .await
        {
            Some(cached) => {
                tracing::info!(task_id = %task_id, fingerprint, "ASR cache hit");
                progress.set(90, "using cached transcription");
                cached
            }
            None => {
                let segments = self
                    .transcribe_chunked(task_id, &audio_path, &payload.options, &progress)
                    .await?;
                cache_util::put_json(
                    services.cache.as_ref(),
                    NS_ASR,
                    &cache_key,
                    &segments,
                    TTL_DOWNLOAD_DERIVED,
                )
                .await;
                segments
            }
        };

        progress.set(95, "storing segments");
        let key = segments_key(&payload.audio_ref);
        let body = serde_json::to_vec(&segments).map_err(|e| PipelineError::Internal(e.to_string()))?;
        services.blob.put_bytes(&key, &body, "application/json").await?;

        progress.finish().await;
        tracing::info!(task_id = %task_id, key, segments = segments.len(), "transcription stored");
        Ok(key)
    }

    async fn transcribe_chunked(
        &self,
        task_id: TaskId,
        audio_path: &Path,
        options: &TranscribeOptions,
        progress: &TaskProgress,
    ) -> Result<Vec<Segment>, PipelineError> {
        let services = &self.services;
        let chunk_seconds = options.chunk_minutes * 60;

        let duration = services.slicer.duration_seconds(audio_path).await?;
        let chunks = if duration > f64::from(chunk_seconds) {
            let chunk_dir = services
                .settings
                .work_dir
                .join("chunks")
                .join(task_id.to_string());
            tokio::fs::create_dir_all(&chunk_dir)
                .await
                .map_err(|e| PipelineError::Storage(e.to_string()))?;
            services.slicer.split(audio_path, chunk_seconds, &chunk_dir).await?
        } else {
            vec![audio_path.to_path_buf()]
        };

        let chunk_count = chunks.len();
        tracing::info!(task_id = %task_id, chunk_count, duration, "transcribing");

        let mut all = Vec::new();
        for (index, chunk) in chunks.iter().enumerate() {
            let offset_ms = i64::from(chunk_seconds) * 1000 * index as i64;
            let hook = |engine_percent: u8, message: &str| {
                // Map this chunk's engine progress into the stage's 10..=90.
                let fraction =
                    (index as f64 + f64::from(engine_percent) / 100.0) / chunk_count as f64;
                let percent = 10 + (fraction * 80.0) as u8;
                progress.set(percent.min(90), message);
            };

            let mut segments = services.speech.transcribe(chunk, options, &hook).await?;
            for segment in &mut segments {
                segment.shift(offset_ms);
            }
            all.extend(segments);
        }

        // One word per segment so the enrich stage can re-segment
        // linguistically.
        Ok(explode_to_words(all))
    }
}

/// The config subset that affects ASR output (cache-key contract).
fn asr_config_subset(options: &TranscribeOptions) -> serde_json::Value {
    json!({
        "model": options.model,
        "language": options.language,
        "device": options.device,
        "compute_type": options.compute_type,
    })
}

/// Re-emit engine output one word per segment, keeping each word's span.
fn explode_to_words(segments: Vec<Segment>) -> Vec<Segment> {
    let mut out = Vec::new();
    for segment in segments {
        if segment.word_segments.is_empty() {
            // Engine gave no word timings for this span; keep it whole.
            out.push(segment);
            continue;
        }
        for word in segment.word_segments {
            if word.text.trim().is_empty() {
                continue;
            }
            out.push(Segment::word(word.start_time, word.end_time, word.text));
        }
    }
    out
}

/// Key of the segment JSON, next to the audio object.
fn segments_key(audio_ref: &str) -> String {
    let path = Path::new(audio_ref);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("audio");
    let parent = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str());
    match parent {
        Some(dir) if !path.is_absolute() => format!("{dir}/{stem}.segments.json"),
        _ => format!("{stem}/{stem}.segments.json"),
    }
}
