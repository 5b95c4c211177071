//! Per-segment token analysis through the chat model.
//!
//! The model must return tokens whose concatenated surface text equals
//! the segment text character for character (whitespace aside). A
//! bounded repair loop feeds validation failures back to the model; a
//! segment that cannot be repaired within `MAX_STEPS` rounds degrades
//! to one token per character with empty readings.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use jimaku_core::domain::segment::{squashed_text, squashed_token_text};
use jimaku_core::{ChatCompletionPort, ChatError, ChatMessage, PipelineError, Token};

use super::json_extract::extract_array;

/// Repair rounds before the degraded fallback.
pub const MAX_STEPS: u32 = 3;

const SYSTEM_PROMPT: &str = "You are a Japanese language analyzer. Analyze Japanese text and \
extract word-level information including furigana, romaji, and part of speech.";

/// Outcome of validating one model reply.
enum TokenValidation {
    Valid(Vec<Token>),
    NeedsRepair(String),
}

pub struct TokenAnalyzer {
    chat: Arc<dyn ChatCompletionPort>,
    model: String,
    batch_size: usize,
    max_concurrent: usize,
}

impl TokenAnalyzer {
    pub fn new(
        chat: Arc<dyn ChatCompletionPort>,
        model: impl Into<String>,
        batch_size: u32,
        max_concurrent: u32,
    ) -> Self {
        Self {
            chat,
            model: model.into(),
            batch_size: (batch_size as usize).max(1),
            max_concurrent: (max_concurrent as usize).max(1),
        }
    }

    /// Analyze every text, preserving order. Upstream failures surface
    /// as errors (the queue retries the stage); validation exhaustion
    /// degrades per segment instead.
    pub async fn analyze_texts(&self, texts: &[String]) -> Result<Vec<Vec<Token>>, PipelineError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut join_set = JoinSet::new();

        for (batch_index, batch) in texts.chunks(self.batch_size).enumerate() {
            let chat = Arc::clone(&self.chat);
            let model = self.model.clone();
            let semaphore = Arc::clone(&semaphore);
            let batch: Vec<String> = batch.to_vec();

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let mut results = Vec::with_capacity(batch.len());
                for text in &batch {
                    results.push(analyze_one(chat.as_ref(), &model, text).await?);
                }
                Ok::<_, PipelineError>((batch_index, results))
            });
        }

        let mut ordered: Vec<Option<Vec<Vec<Token>>>> =
            vec![None; texts.len().div_ceil(self.batch_size)];
        while let Some(joined) = join_set.join_next().await {
            let (batch_index, results) =
                joined.map_err(|e| PipelineError::Internal(e.to_string()))??;
            ordered[batch_index] = Some(results);
        }

        Ok(ordered.into_iter().flatten().flatten().collect())
    }
}

/// Analyze a single text with the bounded repair loop.
async fn analyze_one(
    chat: &dyn ChatCompletionPort,
    model: &str,
    text: &str,
) -> Result<Vec<Token>, PipelineError> {
    if squashed_text(text).is_empty() {
        return Ok(Vec::new());
    }

    let mut messages = vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(analysis_prompt(text)),
    ];

    for step in 0..MAX_STEPS {
        let reply = match chat.complete(model, &messages, 0.1).await {
            Ok(reply) => reply,
            Err(ChatError::Empty) => {
                // Treat like an unparseable reply: ask again.
                messages.push(ChatMessage::user(
                    "The response was empty. Output ONLY a valid JSON array.",
                ));
                continue;
            }
            Err(other) => return Err(other.into()),
        };

        match validate_reply(text, &reply) {
            TokenValidation::Valid(tokens) => return Ok(tokens),
            TokenValidation::NeedsRepair(reason) => {
                tracing::warn!(step = step + 1, reason, "token analysis failed validation");
                messages.push(ChatMessage::assistant(reply));
                messages.push(ChatMessage::user(format!(
                    "Validation failed: {reason}\nFix the errors and output ONLY a valid JSON array."
                )));
            }
        }
    }

    tracing::warn!(text, "token analysis exhausted repair rounds, emitting fallback");
    Ok(fallback_tokens(text))
}

/// Parse and validate one reply against the preservation laws.
fn validate_reply(text: &str, reply: &str) -> TokenValidation {
    let Some(json) = extract_array(reply) else {
        return TokenValidation::NeedsRepair("no JSON array found in the response".to_string());
    };

    let tokens: Vec<Token> = match serde_json::from_str(json) {
        Ok(tokens) => tokens,
        Err(e) => return TokenValidation::NeedsRepair(format!("invalid JSON: {e}")),
    };

    if tokens.is_empty() {
        return TokenValidation::NeedsRepair("the result is empty".to_string());
    }

    let original = squashed_text(text);
    let result = squashed_token_text(&tokens);

    if original == result {
        return TokenValidation::Valid(tokens);
    }

    // Character-frequency diff makes actionable repair feedback.
    let original_count = original.chars().count();
    let result_count = result.chars().count();
    let mut reason = format!(
        "the concatenated token texts do not match the original \
         (original {original_count} chars, result {result_count} chars)"
    );
    let missing = char_diff(&original, &result);
    if !missing.is_empty() {
        reason.push_str(&format!("; missing characters: {missing:?}"));
    }
    let extra = char_diff(&result, &original);
    if !extra.is_empty() {
        reason.push_str(&format!("; extra characters: {extra:?}"));
    }
    reason.push_str(&format!(
        "; every character of '{text}' must appear exactly once, unmodified and in order"
    ));
    TokenValidation::NeedsRepair(reason)
}

/// Characters of `a` not covered by `b` (multiset difference, capped).
fn char_diff(a: &str, b: &str) -> Vec<char> {
    let mut counts: HashMap<char, i64> = HashMap::new();
    for c in a.chars() {
        *counts.entry(c).or_default() += 1;
    }
    for c in b.chars() {
        *counts.entry(c).or_default() -= 1;
    }
    let mut diff: Vec<char> = Vec::new();
    for (c, n) in counts {
        for _ in 0..n.max(0) {
            diff.push(c);
        }
    }
    diff.sort_unstable();
    diff.truncate(20);
    diff
}

/// The degraded one-token-per-character result.
fn fallback_tokens(text: &str) -> Vec<Token> {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .map(Token::fallback)
        .collect()
}

fn analysis_prompt(text: &str) -> String {
    let char_count = squashed_text(text).chars().count();
    format!(
        "Analyze the following Japanese text and extract word-level information:\n\
         <text>{text}</text>\n\n\
         Requirements:\n\
         1. Do NOT correct, fix, or normalize the input in any way. The 'text' fields must \
         reproduce the original exactly, even if it looks wrong or non-standard.\n\
         2. One-to-one correspondence: every character of the input appears in exactly one \
         token, in order. No character may be dropped, added, replaced, or reordered.\n\
         3. No morpheme expansion or lemmatization: keep contracted and conjugated forms as \
         written. Never rewrite a surface form to its dictionary form.\n\
         4. Segment by Japanese grammar: particles are separate tokens; a verb or adjective \
         stem plus its conjugation is one token; auxiliary verbs are separate tokens.\n\
         5. The input has {char_count} characters excluding whitespace; the concatenated \
         'text' fields must have exactly {char_count} characters excluding whitespace.\n\n\
         Return ONLY a JSON array, no prose, no markdown. Each element:\n\
         {{\"text\": \"...\", \"furigana\": \"...\", \"romaji\": \"...\", \"type\": \"...\"}}\n\n\
         Example for '母親が逮捕されました':\n\
         [{{\"text\": \"母親\", \"furigana\": \"ははおや\", \"romaji\": \"hahaoya\", \"type\": \"noun\"}},\n\
          {{\"text\": \"が\", \"furigana\": \"が\", \"romaji\": \"ga\", \"type\": \"particle\"}},\n\
          {{\"text\": \"逮捕されました\", \"furigana\": \"たいほされました\", \"romaji\": \"taihosaremashita\", \"type\": \"verb\"}}]"
    )
}
