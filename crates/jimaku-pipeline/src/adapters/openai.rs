//! OpenAI-compatible chat-completions client.

use async_trait::async_trait;
use serde_json::{Value, json};

use jimaku_core::{ChatCompletionPort, ChatError, ChatMessage};

/// Chat adapter for any endpoint speaking the `/chat/completions`
/// protocol (OpenAI, compatible local servers, gateways).
pub struct OpenAiChat {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiChat {
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl ChatCompletionPort for OpenAiChat {
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<String, ChatError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": model,
            "messages": messages,
            "temperature": temperature,
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ChatError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ChatError::Rejected(format!("{status}: {detail}")));
        }
        if !status.is_success() {
            return Err(ChatError::Unavailable(format!("endpoint returned {status}")));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| ChatError::Unavailable(format!("bad response body: {e}")))?;
        content_from_response(&value)
    }
}

/// Pull the assistant message content out of a completions response.
fn content_from_response(value: &Value) -> Result<String, ChatError> {
    let content = value
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .unwrap_or("");
    if content.trim().is_empty() {
        Err(ChatError::Empty)
    } else {
        Ok(content.to_string())
    }
}
