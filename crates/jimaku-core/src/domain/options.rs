//! Per-stage configuration carried in work-unit payloads.
//!
//! Only options that change a step's output participate in its cache key
//! (see `cache_key`); keep the two in sync when adding fields.

use serde::{Deserialize, Serialize};

/// Transcription stage options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TranscribeOptions {
    /// Speech model identifier (e.g. "large-v3").
    pub model: String,
    /// Language code or "auto".
    pub language: String,
    /// Compute device ("cpu" / "cuda").
    pub device: String,
    /// Numeric precision for inference.
    pub compute_type: String,
    pub batch_size: u32,
    /// Wall-clock chunk length for long audio.
    pub chunk_minutes: u32,
}

impl Default for TranscribeOptions {
    fn default() -> Self {
        Self {
            model: "large-v3".to_string(),
            language: "auto".to_string(),
            device: "cpu".to_string(),
            compute_type: "float32".to_string(),
            batch_size: 16,
            chunk_minutes: 20,
        }
    }
}

/// Enrichment stage options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnrichOptions {
    /// Chat model identifier; `None` falls back to the configured default.
    pub model: Option<String>,
    /// Translation target language code (e.g. "zh", "en").
    pub target_language: Option<String>,
    pub need_split: bool,
    pub need_analyze: bool,
    pub need_translate: bool,
    /// Two-pass reflective translation.
    pub need_reflect: bool,
    /// Max characters per sentence for CJK text.
    pub max_chars_cjk: u32,
    /// Max words per sentence for English text.
    pub max_chars_en: u32,
    /// Segments per LLM request.
    pub batch_size: u32,
    /// Concurrent LLM requests per worker.
    pub max_concurrent: u32,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self {
            model: None,
            target_language: Some("zh".to_string()),
            need_split: true,
            need_analyze: true,
            need_translate: true,
            need_reflect: false,
            max_chars_cjk: 25,
            max_chars_en: 20,
            batch_size: 10,
            max_concurrent: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_limits() {
        let opts = EnrichOptions::default();
        assert_eq!(opts.max_chars_cjk, 25);
        assert_eq!(opts.max_chars_en, 20);
        assert_eq!(opts.batch_size, 10);
        assert_eq!(opts.max_concurrent, 10);

        let t = TranscribeOptions::default();
        assert_eq!(t.chunk_minutes, 20);
        assert_eq!(t.compute_type, "float32");
    }
}
