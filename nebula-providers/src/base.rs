//! Base trait for LLM providers

use async_trait::async_trait;
use futures::stream::{self, Stream};
use nebula_core::session::{ChatMessage, Role};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use thiserror::Error;

/// Error type for provider operations
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    /// The provider refused the credential (HTTP 401/403)
    #[error("API key rejected by provider: {0}")]
    Unauthorized(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("API error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },
}

impl ProviderError {
    /// Whether the stored credential should be discarded and re-entered
    pub fn is_auth_error(&self) -> bool {
        matches!(self, ProviderError::Unauthorized(_))
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

pub type ProviderEventStream = Pin<Box<dyn Stream<Item = ProviderResult<LLMStreamEvent>> + Send>>;

/// Response from an LLM provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMResponse {
    pub content: Option<String>,
    #[serde(default = "default_finish_reason")]
    pub finish_reason: String,
    #[serde(default)]
    pub usage: HashMap<String, i64>,
}

fn default_finish_reason() -> String {
    "stop".to_string()
}

/// Streaming event emitted by LLM providers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LLMStreamEvent {
    /// Incremental assistant text output
    TextDelta(String),
    /// Final completed response
    Completed(LLMResponse),
}

/// A message in the chat-completions wire format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

impl From<&ChatMessage> for Message {
    fn from(msg: &ChatMessage) -> Self {
        match msg.role {
            Role::Human => Message::user(&msg.content),
            Role::Assistant => Message::assistant(&msg.content),
            Role::System => Message::system(&msg.content),
        }
    }
}

/// Trait for LLM providers
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Send a chat completion request
    async fn chat(
        &self,
        messages: Vec<Message>,
        model: Option<String>,
        max_tokens: Option<u32>,
        temperature: f64,
    ) -> ProviderResult<LLMResponse>;

    /// Send a streaming chat completion request.
    ///
    /// Default behavior falls back to non-streaming chat and emits one text delta.
    async fn chat_stream(
        &self,
        messages: Vec<Message>,
        model: Option<String>,
        max_tokens: Option<u32>,
        temperature: f64,
    ) -> ProviderResult<ProviderEventStream> {
        let response = self.chat(messages, model, max_tokens, temperature).await?;

        let mut events = Vec::new();
        if let Some(content) = response.content.clone() {
            if !content.is_empty() {
                events.push(Ok(LLMStreamEvent::TextDelta(content)));
            }
        }
        events.push(Ok(LLMStreamEvent::Completed(response)));

        Ok(Box::pin(stream::iter(events)))
    }

    /// Get the default model for this provider
    fn get_default_model(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    struct FixedProvider;

    #[async_trait]
    impl LLMProvider for FixedProvider {
        async fn chat(
            &self,
            _messages: Vec<Message>,
            _model: Option<String>,
            _max_tokens: Option<u32>,
            _temperature: f64,
        ) -> ProviderResult<LLMResponse> {
            Ok(LLMResponse {
                content: Some("fixed".to_string()),
                finish_reason: "stop".to_string(),
                usage: HashMap::new(),
            })
        }

        fn get_default_model(&self) -> String {
            "fixed-model".to_string()
        }
    }

    #[test]
    fn test_history_roles_map_to_wire_roles() {
        assert_eq!(Message::from(&ChatMessage::human("a")).role, "user");
        assert_eq!(Message::from(&ChatMessage::assistant("b")).role, "assistant");
        assert_eq!(Message::from(&ChatMessage::system("c")).role, "system");
    }

    #[test]
    fn test_only_unauthorized_is_auth_error() {
        assert!(ProviderError::Unauthorized("bad key".into()).is_auth_error());
        assert!(!ProviderError::Timeout(5).is_auth_error());
        assert!(!ProviderError::ApiError {
            status: 500,
            message: "boom".into()
        }
        .is_auth_error());
    }

    #[tokio::test]
    async fn test_default_chat_stream_falls_back_to_chat() {
        let provider = FixedProvider;
        let events: Vec<_> = provider
            .chat_stream(vec![Message::user("hi")], None, None, 0.7)
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Ok(LLMStreamEvent::TextDelta(t)) if t == "fixed"));
        assert!(matches!(&events[1], Ok(LLMStreamEvent::Completed(_))));
    }
}
