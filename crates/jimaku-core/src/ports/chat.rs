//! Port for the LLM chat-completion endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by chat adapters.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Endpoint unreachable or returned a server error (retryable).
    #[error("chat endpoint unavailable: {0}")]
    Unavailable(String),

    /// Endpoint rejected the request (bad key, bad model, ...).
    #[error("chat request rejected: {0}")]
    Rejected(String),

    #[error("chat endpoint returned an empty response")]
    Empty,
}

/// One message of a chat conversation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Chat completion over text. Adapters own model selection defaults;
/// callers pass an explicit model when the step's cache key depends on it.
#[async_trait]
pub trait ChatCompletionPort: Send + Sync {
    /// Run one completion and return the assistant message content.
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<String, ChatError>;
}
