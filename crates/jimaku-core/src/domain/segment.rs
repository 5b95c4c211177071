//! Subtitle data model: timed segments, word spans, and analyzed tokens.
//!
//! Field names here are the wire format of the final artifact and of the
//! cached intermediate step outputs; renames would invalidate both.

use serde::{Deserialize, Serialize};

/// A single word with its audio span. Times are integer milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordSpan {
    pub start_time: i64,
    pub end_time: i64,
    pub text: String,
}

/// A linguistic token inside a segment: surface text plus reading,
/// romanization, part of speech, and an optional aligned time span.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    /// Reading in kana (empty for the degraded fallback).
    #[serde(default)]
    pub furigana: String,
    /// Romanized reading (empty for the degraded fallback).
    #[serde(default)]
    pub romaji: String,
    /// Part of speech ("noun", "particle", ... or "unknown").
    #[serde(rename = "type", default)]
    pub pos: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
}

impl Token {
    /// The degraded one-token-per-character fallback entry.
    #[must_use]
    pub fn fallback(ch: char) -> Self {
        Self {
            text: ch.to_string(),
            furigana: String::new(),
            romaji: String::new(),
            pos: "unknown".to_string(),
            start_time: None,
            end_time: None,
        }
    }
}

/// A timed subtitle segment.
///
/// Fresh from transcription a segment is one word carrying its own word
/// span; after linguistic re-segmentation it is a sentence whose
/// `word_segments` are the original word timings and whose `tokens` are
/// the analyzed units.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub start_time: i64,
    pub end_time: i64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub word_segments: Vec<WordSpan>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tokens: Vec<Token>,
}

impl Segment {
    /// A word-level segment whose word span equals the segment span.
    #[must_use]
    pub fn word(start_time: i64, end_time: i64, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            start_time,
            end_time,
            word_segments: vec![WordSpan {
                start_time,
                end_time,
                text: text.clone(),
            }],
            text,
            translation: None,
            tokens: Vec::new(),
        }
    }

    /// Shift all timestamps (segment, words, aligned tokens) by `offset_ms`.
    pub fn shift(&mut self, offset_ms: i64) {
        self.start_time += offset_ms;
        self.end_time += offset_ms;
        for word in &mut self.word_segments {
            word.start_time += offset_ms;
            word.end_time += offset_ms;
        }
        for token in &mut self.tokens {
            if let Some(start) = token.start_time.as_mut() {
                *start += offset_ms;
            }
            if let Some(end) = token.end_time.as_mut() {
                *end += offset_ms;
            }
        }
    }
}

/// Whether a segment list is word-level output straight from the
/// transcriber (one word per segment), as opposed to sentence-level.
#[must_use]
pub fn is_word_level(segments: &[Segment]) -> bool {
    !segments.is_empty() && segments.iter().all(|s| s.word_segments.len() == 1)
}

/// Concatenated segment text with all whitespace removed, used for the
/// character-preservation checks of the enrichment contracts.
#[must_use]
pub fn squashed_text(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Whitespace-insensitive concatenation of token surface texts.
#[must_use]
pub fn squashed_token_text(tokens: &[Token]) -> String {
    tokens
        .iter()
        .flat_map(|t| t.text.chars())
        .filter(|c| !c.is_whitespace())
        .collect()
}
