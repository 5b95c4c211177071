//! Batch translation of sentence-level segments.
//!
//! Segments go to the chat model in numbered batches; the reply is a
//! JSON object keyed by those numbers. Batches run concurrently under a
//! semaphore, and completed counts stream back to the caller for
//! progress reporting.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use jimaku_core::domain::segment::squashed_text;
use jimaku_core::{ChatCompletionPort, ChatError, ChatMessage, PipelineError, Segment};

use super::json_extract::extract_object;

/// Attempts per batch before giving up on the stage.
const BATCH_ATTEMPTS: u32 = 2;

/// `(finished, total)` segment counts.
pub type BatchProgressFn<'a> = &'a (dyn Fn(usize, usize) + Send + Sync);

pub struct Translator {
    chat: Arc<dyn ChatCompletionPort>,
    model: String,
    target_language: String,
    reflect: bool,
    batch_size: usize,
    max_concurrent: usize,
}

impl Translator {
    pub fn new(
        chat: Arc<dyn ChatCompletionPort>,
        model: impl Into<String>,
        target_language: impl Into<String>,
        reflect: bool,
        batch_size: u32,
        max_concurrent: u32,
    ) -> Self {
        Self {
            chat,
            model: model.into(),
            target_language: target_language.into(),
            reflect,
            batch_size: (batch_size as usize).max(1),
            max_concurrent: (max_concurrent as usize).max(1),
        }
    }

    /// Fill in `translation` on every non-empty segment.
    pub async fn translate(
        &self,
        segments: &mut [Segment],
        progress: BatchProgressFn<'_>,
    ) -> Result<(), PipelineError> {
        let numbered: Vec<(usize, String)> = segments
            .iter()
            .enumerate()
            .filter(|(_, s)| !squashed_text(&s.text).is_empty())
            .map(|(i, s)| (i, s.text.clone()))
            .collect();
        let total = numbered.len();
        if total == 0 {
            return Ok(());
        }

        let finished = Arc::new(AtomicUsize::new(0));
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut join_set = JoinSet::new();

        for batch in numbered.chunks(self.batch_size) {
            let chat = Arc::clone(&self.chat);
            let model = self.model.clone();
            let target_language = self.target_language.clone();
            let reflect = self.reflect;
            let semaphore = Arc::clone(&semaphore);
            let batch: Vec<(usize, String)> = batch.to_vec();

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let translated =
                    translate_batch(chat.as_ref(), &model, &target_language, reflect, &batch)
                        .await?;
                Ok::<_, PipelineError>((batch.len(), translated))
            });
        }

        let mut all: HashMap<usize, String> = HashMap::new();
        while let Some(joined) = join_set.join_next().await {
            let (batch_len, translated) =
                joined.map_err(|e| PipelineError::Internal(e.to_string()))??;
            all.extend(translated);
            let done = finished.fetch_add(batch_len, Ordering::SeqCst) + batch_len;
            progress(done, total);
        }

        for (index, translation) in all {
            if let Some(segment) = segments.get_mut(index) {
                segment.translation = Some(translation);
            }
        }
        Ok(())
    }
}

/// Translate one numbered batch, with a bounded re-ask on bad JSON.
async fn translate_batch(
    chat: &dyn ChatCompletionPort,
    model: &str,
    target_language: &str,
    reflect: bool,
    batch: &[(usize, String)],
) -> Result<HashMap<usize, String>, PipelineError> {
    let mut messages = vec![
        ChatMessage::system(
            "You are a professional subtitle translator. Translate faithfully and \
             concisely; return only the requested JSON.",
        ),
        ChatMessage::user(batch_prompt(target_language, reflect, batch)),
    ];

    for attempt in 0..BATCH_ATTEMPTS {
        let reply = match chat.complete(model, &messages, 0.3).await {
            Ok(reply) => reply,
            Err(ChatError::Empty) => {
                messages.push(ChatMessage::user("The response was empty. Output ONLY the JSON object."));
                continue;
            }
            Err(other) => return Err(other.into()),
        };

        match parse_batch_reply(&reply, batch) {
            Ok(translated) => return Ok(translated),
            Err(reason) => {
                tracing::warn!(attempt = attempt + 1, reason, "translation batch failed to parse");
                messages.push(ChatMessage::assistant(reply));
                messages.push(ChatMessage::user(format!(
                    "That was not usable: {reason}\nReturn ONLY a JSON object mapping each \
                     input number to its translation."
                )));
            }
        }
    }

    // Persistent garbage from the endpoint; let the queue retry the stage.
    Err(PipelineError::Upstream(
        "translation endpoint kept returning unparseable batches".to_string(),
    ))
}

fn parse_batch_reply(
    reply: &str,
    batch: &[(usize, String)],
) -> Result<HashMap<usize, String>, String> {
    let json = extract_object(reply).ok_or("no JSON object found in the response")?;
    let map: HashMap<String, String> =
        serde_json::from_str(json).map_err(|e| format!("invalid JSON: {e}"))?;

    let mut translated = HashMap::new();
    for (index, _) in batch {
        match map.get(&index.to_string()) {
            Some(value) if !value.trim().is_empty() => {
                translated.insert(*index, value.trim().to_string());
            }
            _ => return Err(format!("entry {index} is missing or empty")),
        }
    }
    Ok(translated)
}

fn batch_prompt(target_language: &str, reflect: bool, batch: &[(usize, String)]) -> String {
    let mut numbered = String::new();
    for (index, text) in batch {
        numbered.push_str(&format!("{index}: {text}\n"));
    }
    let reflect_clause = if reflect {
        "\nAfter drafting each translation, re-read it against the source and refine \
         wording and register before answering."
    } else {
        ""
    };
    format!(
        "Translate the following subtitle lines into {target_language}. Keep each line a \
         single natural sentence; do not merge or split lines; do not add notes.{reflect_clause}\n\n\
         {numbered}\n\
         Return ONLY a JSON object mapping each number to its translation, e.g. \
         {{\"0\": \"...\", \"1\": \"...\"}}."
    )
}
