//! One-shot dictionary lookup for a single token. Stateless: one chat
//! call per query, no task, no cache.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};

use jimaku_core::{ChatCompletionPort, ChatMessage};

use crate::enrich::json_extract::extract_object;

const SYSTEM_PROMPT: &str = "You are a Japanese-learner's dictionary. For the given word, \
return a JSON object with: word, pronunciation {furigana, romaji}, part_of_speech, and \
meanings (an array of {definition, example} objects with concise English definitions and a \
short Japanese example sentence each). Return ONLY the JSON object.";

/// A dictionary query as posted by clients.
#[derive(Clone, Debug, Deserialize)]
pub struct DictionaryQuery {
    pub word: String,
    #[serde(default)]
    pub furigana: Option<String>,
    #[serde(default)]
    pub romaji: Option<String>,
    #[serde(default)]
    pub part_of_speech: Option<String>,
}

pub struct DictionaryService {
    chat: Arc<dyn ChatCompletionPort>,
    model: String,
}

impl DictionaryService {
    pub fn new(chat: Arc<dyn ChatCompletionPort>, model: impl Into<String>) -> Self {
        Self {
            chat,
            model: model.into(),
        }
    }

    /// Look up one word. Never fails outward: an LLM problem yields a
    /// degraded record carrying the error string.
    pub async fn query(&self, query: &DictionaryQuery) -> Value {
        let mut word_info = json!({ "text": query.word });
        if let Some(furigana) = &query.furigana {
            word_info["furigana"] = json!(furigana);
        }
        if let Some(romaji) = &query.romaji {
            word_info["romaji"] = json!(romaji);
        }
        if let Some(pos) = &query.part_of_speech {
            word_info["type"] = json!(pos);
        }

        let messages = [
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Look up this Japanese word:\n```json\n{word_info}\n```"
            )),
        ];

        match self.chat.complete(&self.model, &messages, 0.3).await {
            Ok(reply) => match extract_object(&reply).and_then(|json| serde_json::from_str(json).ok())
            {
                Some(parsed) => parsed,
                None => {
                    tracing::warn!(word = %query.word, "dictionary reply was not valid JSON");
                    self.degraded(query, "unparseable dictionary response")
                }
            },
            Err(e) => {
                tracing::error!(word = %query.word, error = %e, "dictionary lookup failed");
                self.degraded(query, &e.to_string())
            }
        }
    }

    fn degraded(&self, query: &DictionaryQuery, error: &str) -> Value {
        json!({
            "word": query.word,
            "pronunciation": {
                "furigana": query.furigana.clone().unwrap_or_default(),
                "romaji": query.romaji.clone().unwrap_or_default(),
            },
            "part_of_speech": query.part_of_speech.clone().unwrap_or_else(|| "unknown".to_string()),
            "meanings": [],
            "error": error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeChat;

    fn query() -> DictionaryQuery {
        DictionaryQuery {
            word: "母親".to_string(),
            furigana: Some("ははおや".to_string()),
            romaji: Some("hahaoya".to_string()),
            part_of_speech: Some("noun".to_string()),
        }
    }

    #[tokio::test]
    async fn parses_a_well_formed_reply() {
        let chat = Arc::new(FakeChat::scripted([r#"{
            "word": "母親",
            "pronunciation": {"furigana": "ははおや", "romaji": "hahaoya"},
            "part_of_speech": "noun",
            "meanings": [{"definition": "mother", "example": "母親が来た。"}]
        }"#]));
        let service = DictionaryService::new(chat, "m");

        let result = service.query(&query()).await;
        assert_eq!(result["word"], "母親");
        assert_eq!(result["meanings"][0]["definition"], "mother");
        assert!(result.get("error").is_none());
    }

    #[tokio::test]
    async fn llm_failure_degrades_instead_of_erroring() {
        let chat = Arc::new(FakeChat::empty());
        let service = DictionaryService::new(chat, "m");

        let result = service.query(&query()).await;
        assert_eq!(result["word"], "母親");
        assert_eq!(result["pronunciation"]["furigana"], "ははおや");
        assert_eq!(result["meanings"], json!([]));
        assert!(result["error"].as_str().is_some());
    }

    #[tokio::test]
    async fn unparseable_reply_degrades() {
        let chat = Arc::new(FakeChat::scripted(["I don't know that word."]));
        let service = DictionaryService::new(chat, "m");

        let result = service.query(&query()).await;
        assert!(result["error"].as_str().unwrap().contains("unparseable"));
    }
}
