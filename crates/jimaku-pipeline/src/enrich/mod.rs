//! Enrich stage: word-level segments -> the final annotated subtitle
//! document.
//!
//! Five sub-steps run linearly - sentence re-segmentation, per-token
//! analysis, token time alignment, translation, artifact
//! materialization - each independently memoized in the step cache
//! under a key derived from its own input JSON and the options that
//! affect its output.

pub mod align;
pub mod analyze;
pub mod json_extract;
pub mod split;
pub mod translate;

use std::path::Path;
use std::sync::Arc;

use serde_json::json;

use jimaku_core::cache_key::{NS_LLM, TTL_LLM_DERIVED, json_fingerprint, step_cache_key};
use jimaku_core::domain::segment::is_word_level;
use jimaku_core::{
    BlobStorePort, EnrichOptions, EnrichPayload, PipelineError, Segment, StorageError, TaskId,
};

use crate::progress::TaskProgress;
use crate::{Services, cache_util};
use analyze::TokenAnalyzer;
use split::SentenceSplitter;
use translate::Translator;

pub struct EnrichStage {
    services: Arc<Services>,
}

impl EnrichStage {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    /// Run the stage; returns the blob key of the final JSON artifact.
    pub async fn run(
        &self,
        task_id: TaskId,
        payload: &EnrichPayload,
    ) -> Result<String, PipelineError> {
        let services = &self.services;
        let options = &payload.options;
        let model = options
            .model
            .clone()
            .unwrap_or_else(|| services.settings.llm_model.clone());

        let progress = TaskProgress::start(services.tasks.clone(), task_id);
        progress.set(5, "loading subtitles");

        let input_bytes = read_ref_bytes(services.blob.as_ref(), &payload.subtitle_ref).await?;
        let input_fingerprint = json_fingerprint(&input_bytes);
        let result_key = step_cache_key(
            "enrich.result",
            &input_fingerprint,
            &result_config_subset(options, &model),
        );
        let output_key = enriched_key(&payload.subtitle_ref);

        // A finished identical run short-circuits the whole stage.
        if let Some(artifact) =
            cache_util::get_json::<Vec<Segment>>(services.cache.as_ref(), NS_LLM, &result_key).await
        {
            tracing::info!(task_id = %task_id, "enrich result cache hit");
            progress.set(95, "using cached result");
            self.store_artifact(&output_key, &artifact).await?;
            progress.finish().await;
            return Ok(output_key);
        }

        let mut segments: Vec<Segment> = serde_json::from_slice(&input_bytes)
            .map_err(|e| PipelineError::Input(format!("bad subtitle JSON: {e}")))?;

        // (a) Linguistic re-segmentation of word-level input.
        if options.need_split && is_word_level(&segments) {
            progress.set(10, "splitting into sentences");
            segments = self
                .split_step(&segments, options, &model)
                .await?;
        }

        // (b) Per-segment token analysis.
        if options.need_analyze {
            progress.set(55, "analyzing tokens");
            segments = self.analyze_step(segments, options, &model).await?;
        }

        // (c) Token time-stamp alignment against the word timings.
        progress.set(58, "aligning token timestamps");
        segments = self.align_step(segments).await;

        // (d) Translation.
        if options.need_translate {
            if let Some(target_language) = options.target_language.as_deref() {
                segments = self
                    .translate_step(segments, options, &model, target_language, &progress)
                    .await?;
            }
        }

        // (e) Final artifact.
        progress.set(95, "writing artifact");
        self.store_artifact(&output_key, &segments).await?;
        cache_util::put_json(
            services.cache.as_ref(),
            NS_LLM,
            &result_key,
            &segments,
            TTL_LLM_DERIVED,
        )
        .await;

        progress.finish().await;
        tracing::info!(task_id = %task_id, key = output_key, segments = segments.len(), "enrichment stored");
        Ok(output_key)
    }

    async fn split_step(
        &self,
        segments: &[Segment],
        options: &EnrichOptions,
        model: &str,
    ) -> Result<Vec<Segment>, PipelineError> {
        let services = &self.services;
        let fingerprint = fingerprint_of(segments)?;
        let key = step_cache_key(
            "enrich.split",
            &fingerprint,
            &json!({
                "model": model,
                "max_chars_cjk": options.max_chars_cjk,
                "max_chars_en": options.max_chars_en,
            }),
        );

        if let Some(cached) =
            cache_util::get_json::<Vec<Segment>>(services.cache.as_ref(), NS_LLM, &key).await
        {
            tracing::debug!("sentence split cache hit");
            return Ok(cached);
        }

        let splitter = SentenceSplitter::new(
            services.chat.clone(),
            model,
            options.max_chars_cjk,
            options.max_chars_en,
        );
        let sentences = splitter.split(segments).await?;
        cache_util::put_json(services.cache.as_ref(), NS_LLM, &key, &sentences, TTL_LLM_DERIVED)
            .await;
        Ok(sentences)
    }

    async fn analyze_step(
        &self,
        mut segments: Vec<Segment>,
        options: &EnrichOptions,
        model: &str,
    ) -> Result<Vec<Segment>, PipelineError> {
        let services = &self.services;
        let fingerprint = fingerprint_of(&segments)?;
        let key = step_cache_key("enrich.analyze", &fingerprint, &json!({ "model": model }));

        if let Some(cached) =
            cache_util::get_json::<Vec<Segment>>(services.cache.as_ref(), NS_LLM, &key).await
        {
            tracing::debug!("token analysis cache hit");
            return Ok(cached);
        }

        let texts: Vec<String> = segments.iter().map(|s| s.text.clone()).collect();
        let analyzer = TokenAnalyzer::new(
            services.chat.clone(),
            model,
            options.batch_size,
            options.max_concurrent,
        );
        let token_lists = analyzer.analyze_texts(&texts).await?;
        for (segment, tokens) in segments.iter_mut().zip(token_lists) {
            segment.tokens = tokens;
        }

        cache_util::put_json(services.cache.as_ref(), NS_LLM, &key, &segments, TTL_LLM_DERIVED)
            .await;
        Ok(segments)
    }

    async fn align_step(&self, mut segments: Vec<Segment>) -> Vec<Segment> {
        let services = &self.services;
        // Keyed by content only; the algorithm itself is versioned.
        let Ok(fingerprint) = fingerprint_of(&segments) else {
            align::align_all(&mut segments);
            return segments;
        };
        let key = step_cache_key("enrich.align", &fingerprint, &json!({ "v": "1" }));

        if let Some(cached) =
            cache_util::get_json::<Vec<Segment>>(services.cache.as_ref(), NS_LLM, &key).await
        {
            return cached;
        }

        align::align_all(&mut segments);
        cache_util::put_json(services.cache.as_ref(), NS_LLM, &key, &segments, TTL_LLM_DERIVED)
            .await;
        segments
    }

    async fn translate_step(
        &self,
        mut segments: Vec<Segment>,
        options: &EnrichOptions,
        model: &str,
        target_language: &str,
        progress: &TaskProgress,
    ) -> Result<Vec<Segment>, PipelineError> {
        let services = &self.services;
        let fingerprint = fingerprint_of(&segments)?;
        let key = step_cache_key(
            "enrich.translate",
            &fingerprint,
            &json!({
                "model": model,
                "target_language": target_language,
                "reflect": options.need_reflect,
            }),
        );

        if let Some(cached) =
            cache_util::get_json::<Vec<Segment>>(services.cache.as_ref(), NS_LLM, &key).await
        {
            tracing::debug!("translation cache hit");
            return Ok(cached);
        }

        progress.set(60, "translating");
        let translator = Translator::new(
            services.chat.clone(),
            model,
            target_language,
            options.need_reflect,
            options.batch_size,
            options.max_concurrent,
        );
        let hook = |finished: usize, total: usize| {
            let fraction = finished as f64 / total.max(1) as f64;
            let percent = 60 + (fraction * 30.0) as u8;
            progress.set(
                percent.min(90),
                &format!("translating: {finished}/{total}"),
            );
        };
        translator.translate(&mut segments, &hook).await?;

        cache_util::put_json(services.cache.as_ref(), NS_LLM, &key, &segments, TTL_LLM_DERIVED)
            .await;
        Ok(segments)
    }

    async fn store_artifact(&self, key: &str, segments: &[Segment]) -> Result<(), PipelineError> {
        let body =
            serde_json::to_vec(segments).map_err(|e| PipelineError::Internal(e.to_string()))?;
        self.services
            .blob
            .put_bytes(key, &body, "application/json")
            .await?;
        Ok(())
    }
}

/// SHA-256 fingerprint of a segment list's JSON form.
fn fingerprint_of(segments: &[Segment]) -> Result<String, PipelineError> {
    let bytes =
        serde_json::to_vec(segments).map_err(|e| PipelineError::Internal(e.to_string()))?;
    Ok(json_fingerprint(&bytes))
}

/// The config subset affecting the whole stage's output.
fn result_config_subset(options: &EnrichOptions, model: &str) -> serde_json::Value {
    json!({
        "model": model,
        "target_language": options.target_language,
        "split": options.need_split,
        "analyze": options.need_analyze,
        "translate": options.need_translate,
        "reflect": options.need_reflect,
        "max_chars_cjk": options.max_chars_cjk,
        "max_chars_en": options.max_chars_en,
    })
}

/// Dual-addressed read of the subtitle reference.
async fn read_ref_bytes(blob: &dyn BlobStorePort, reference: &str) -> Result<Vec<u8>, PipelineError> {
    if blob.exists(reference).await? {
        return Ok(blob.get_bytes(reference).await?);
    }
    let local = Path::new(reference);
    if local.is_file() {
        return Ok(tokio::fs::read(local)
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))?);
    }
    Err(StorageError::NotFound(reference.to_string()).into())
}

/// Artifact key next to the segment JSON.
fn enriched_key(subtitle_ref: &str) -> String {
    if let Some(stripped) = subtitle_ref.strip_suffix(".segments.json") {
        return format!("{stripped}.enriched.json");
    }
    let path = Path::new(subtitle_ref);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("subtitle");
    match path.parent().and_then(|p| p.file_name()).and_then(|n| n.to_str()) {
        Some(dir) if !path.is_absolute() => format!("{dir}/{stem}.enriched.json"),
        _ => format!("{stem}/{stem}.enriched.json"),
    }
}
