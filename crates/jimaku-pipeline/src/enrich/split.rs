//! Linguistic re-segmentation: word-level segments -> sentence-level
//! segments.
//!
//! The chat model proposes sentence boundaries under a strict contract:
//! the concatenation of the returned sentences must equal the input
//! text ignoring whitespace. Sentences are then mapped back onto the
//! original word spans to recover timings. If the model cannot satisfy
//! the contract within the repair budget, a mechanical splitter (by
//! punctuation and length caps) takes over.

use std::sync::Arc;

use jimaku_core::domain::segment::squashed_text;
use jimaku_core::{ChatCompletionPort, ChatError, ChatMessage, PipelineError, Segment, WordSpan};

use super::analyze::MAX_STEPS;
use super::json_extract::extract_array;

const SYSTEM_PROMPT: &str = "You segment transcribed text into natural sentences. You never \
rewrite, translate, or correct the text; you only choose boundaries.";

/// Sentence-final punctuation recognized by the mechanical fallback.
const SENTENCE_ENDS: &[char] = &['。', '！', '？', '!', '?', '.'];

pub struct SentenceSplitter {
    chat: Arc<dyn ChatCompletionPort>,
    model: String,
    max_chars_cjk: u32,
    max_chars_en: u32,
}

impl SentenceSplitter {
    pub fn new(
        chat: Arc<dyn ChatCompletionPort>,
        model: impl Into<String>,
        max_chars_cjk: u32,
        max_chars_en: u32,
    ) -> Self {
        Self {
            chat,
            model: model.into(),
            max_chars_cjk,
            max_chars_en,
        }
    }

    /// Re-segment word-level input into sentence-level segments.
    pub async fn split(&self, segments: &[Segment]) -> Result<Vec<Segment>, PipelineError> {
        let words: Vec<WordSpan> = segments
            .iter()
            .flat_map(|s| s.word_segments.iter().cloned())
            .filter(|w| !squashed_text(&w.text).is_empty())
            .collect();
        if words.is_empty() {
            return Ok(Vec::new());
        }

        let full_text = words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        match self.split_with_model(&full_text).await? {
            Some(sentences) => match map_sentences_to_words(&sentences, &words) {
                Some(mapped) => Ok(mapped),
                None => {
                    tracing::warn!("sentence/word mapping failed, using mechanical split");
                    Ok(mechanical_split(&words, self.max_chars_cjk, self.max_chars_en))
                }
            },
            None => {
                tracing::warn!("sentence split exhausted repair rounds, using mechanical split");
                Ok(mechanical_split(&words, self.max_chars_cjk, self.max_chars_en))
            }
        }
    }

    /// Ask the model for sentence strings; `None` when the repair
    /// budget is exhausted.
    async fn split_with_model(&self, full_text: &str) -> Result<Option<Vec<String>>, PipelineError> {
        let mut messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(split_prompt(full_text, self.max_chars_cjk, self.max_chars_en)),
        ];

        for step in 0..MAX_STEPS {
            let reply = match self.chat.complete(&self.model, &messages, 0.1).await {
                Ok(reply) => reply,
                Err(ChatError::Empty) => {
                    messages.push(ChatMessage::user(
                        "The response was empty. Output ONLY a valid JSON array of strings.",
                    ));
                    continue;
                }
                Err(other) => return Err(other.into()),
            };

            match validate_sentences(full_text, &reply) {
                Ok(sentences) => return Ok(Some(sentences)),
                Err(reason) => {
                    tracing::warn!(step = step + 1, reason, "sentence split failed validation");
                    messages.push(ChatMessage::assistant(reply));
                    messages.push(ChatMessage::user(format!(
                        "Validation failed: {reason}\nOutput ONLY a JSON array of sentence \
                         strings whose concatenation equals the input, ignoring whitespace."
                    )));
                }
            }
        }
        Ok(None)
    }
}

fn validate_sentences(full_text: &str, reply: &str) -> Result<Vec<String>, String> {
    let json = extract_array(reply).ok_or("no JSON array found in the response")?;
    let sentences: Vec<String> =
        serde_json::from_str(json).map_err(|e| format!("invalid JSON: {e}"))?;
    if sentences.is_empty() {
        return Err("the result is empty".to_string());
    }

    let original = squashed_text(full_text);
    let joined: String = sentences.iter().map(|s| squashed_text(s)).collect();
    if original == joined {
        Ok(sentences)
    } else {
        Err(format!(
            "the concatenated sentences do not reproduce the input \
             (input {} chars, output {} chars, ignoring whitespace)",
            original.chars().count(),
            joined.chars().count()
        ))
    }
}

/// Recover each sentence's time span by consuming word spans in order.
fn map_sentences_to_words(sentences: &[String], words: &[WordSpan]) -> Option<Vec<Segment>> {
    let mut out = Vec::with_capacity(sentences.len());
    let mut word_index = 0;

    for sentence in sentences {
        let target = squashed_text(sentence);
        if target.is_empty() {
            continue;
        }

        let mut acc = String::new();
        let start_index = word_index;
        while word_index < words.len() && acc.chars().count() < target.chars().count() {
            acc.push_str(&squashed_text(&words[word_index].text));
            word_index += 1;
        }
        // A word straddling a sentence boundary makes mapping unsound.
        if acc != target {
            return None;
        }

        let covered = &words[start_index..word_index];
        out.push(Segment {
            start_time: covered.first()?.start_time,
            end_time: covered.last()?.end_time,
            text: sentence.trim().to_string(),
            translation: None,
            word_segments: covered.to_vec(),
            tokens: Vec::new(),
        });
    }

    (word_index == words.len()).then_some(out)
}

/// Boundary-and-budget splitter used when the model cannot deliver.
fn mechanical_split(words: &[WordSpan], max_chars_cjk: u32, max_chars_en: u32) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut current: Vec<WordSpan> = Vec::new();
    let mut current_chars = 0usize;

    let flush = |current: &mut Vec<WordSpan>, out: &mut Vec<Segment>| {
        if current.is_empty() {
            return;
        }
        let text = join_words(current);
        out.push(Segment {
            start_time: current[0].start_time,
            end_time: current[current.len() - 1].end_time,
            text,
            translation: None,
            word_segments: std::mem::take(current),
            tokens: Vec::new(),
        });
    };

    for word in words {
        let word_chars = squashed_text(&word.text).chars().count();
        let budget = if word.text.chars().any(is_cjk) || current.iter().any(|w| w.text.chars().any(is_cjk)) {
            max_chars_cjk as usize
        } else {
            max_chars_en as usize
        };

        if current_chars + word_chars > budget && !current.is_empty() {
            flush(&mut current, &mut out);
            current_chars = 0;
        }

        let ends_sentence = word.text.trim_end().ends_with(SENTENCE_ENDS);
        current_chars += word_chars;
        current.push(word.clone());

        if ends_sentence {
            flush(&mut current, &mut out);
            current_chars = 0;
        }
    }
    flush(&mut current, &mut out);
    out
}

/// Join words into display text: CJK runs concatenate, latin words get
/// spaces.
fn join_words(words: &[WordSpan]) -> String {
    let mut text = String::new();
    for (i, word) in words.iter().enumerate() {
        let w = word.text.trim();
        if i > 0 && !w.chars().next().is_some_and(is_cjk)
            && !text.chars().last().is_some_and(is_cjk)
        {
            text.push(' ');
        }
        text.push_str(w);
    }
    text
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF      // hiragana + katakana
        | 0x3400..=0x4DBF    // CJK extension A
        | 0x4E00..=0x9FFF    // CJK unified
        | 0xF900..=0xFAFF    // CJK compatibility
        | 0xFF65..=0xFF9F    // half-width katakana
        | 0x3000..=0x303F    // CJK punctuation
    )
}

fn split_prompt(full_text: &str, max_chars_cjk: u32, max_chars_en: u32) -> String {
    format!(
        "Segment the following transcribed text into natural sentences:\n\
         <text>{full_text}</text>\n\n\
         Rules:\n\
         1. Do NOT rewrite, correct, translate, or normalize anything. Only insert boundaries.\n\
         2. The concatenation of all returned sentences, ignoring whitespace, must equal the \
         input, ignoring whitespace. No character may be added, dropped, or changed.\n\
         3. Prefer boundaries at sentence-final punctuation and natural clause breaks.\n\
         4. Keep sentences at most {max_chars_cjk} characters for CJK text and at most \
         {max_chars_en} words for English text.\n\n\
         Return ONLY a JSON array of sentence strings."
    )
}
