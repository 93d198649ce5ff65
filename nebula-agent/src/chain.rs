//! Conversation chain: prompt assembly plus one model call per user turn.

use futures::StreamExt;
use nebula_core::config::ChatConfig;
use nebula_core::session::{ChatMessage, HistoryResolver, SharedHistory};
use nebula_core::utils::truncate;
use nebula_providers::{LLMProvider, LLMStreamEvent, Message};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::context::{PromptTemplate, PromptValues};
use crate::error::{ChainError, ChainResult};

const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Progress of a streamed turn, for UI consumers
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// A chunk of the assistant's reply
    TextDelta(String),
    /// The exchange was appended to history
    Completed { reply: String },
    /// The turn failed; history is unchanged
    Error { message: String, is_auth_error: bool },
}

/// Model handle, sampling settings and prompt template
pub struct ConversationChain {
    provider: Arc<dyn LLMProvider>,
    template: PromptTemplate,
    model: Option<String>,
    temperature: f64,
    max_tokens: Option<u32>,
}

impl ConversationChain {
    /// Create a chain using the provider's default model
    pub fn new(provider: Arc<dyn LLMProvider>, template: PromptTemplate) -> Self {
        Self {
            provider,
            template,
            model: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
        }
    }

    /// Create a chain from the chat section of the configuration
    pub fn from_config(provider: Arc<dyn LLMProvider>, config: &ChatConfig) -> Self {
        Self::new(provider, PromptTemplate::new(&config.system_prompt))
            .with_model(&config.model)
            .with_temperature(f64::from(config.temperature))
            .with_max_tokens(config.max_tokens)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    /// The model requests are sent with
    pub fn model(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.provider.get_default_model())
    }

    /// Bind a history source to this chain
    pub fn with_history<R: HistoryResolver>(&self, resolver: R) -> ChainWithHistory<'_, R> {
        ChainWithHistory {
            chain: self,
            resolver,
        }
    }
}

/// A chain bound to a history resolver
pub struct ChainWithHistory<'a, R> {
    chain: &'a ConversationChain,
    resolver: R,
}

impl<'a, R: HistoryResolver> ChainWithHistory<'a, R> {
    /// Send `user_text` in the context of `session_id` and return the reply.
    ///
    /// The human message and the reply are appended to the session's
    /// history only when the call succeeds.
    pub async fn invoke(&self, session_id: &str, user_text: &str) -> ChainResult<String> {
        let (history, messages) = self.prepare(session_id, user_text)?;
        let chain = self.chain;

        let response = chain
            .provider
            .chat(
                messages,
                chain.model.clone(),
                chain.max_tokens,
                chain.temperature,
            )
            .await
            .map_err(|e| {
                error!("Model call failed for session {}: {}", session_id, e);
                ChainError::from(e)
            })?;

        let reply = non_empty_reply(response.content)?;
        commit(&history, user_text, &reply);
        info!(
            "Session {} answered ({} chars, finish: {})",
            session_id,
            reply.len(),
            response.finish_reason
        );
        Ok(reply)
    }

    /// Like [`invoke`](Self::invoke), but forwards the reply as it arrives.
    ///
    /// Every outcome is also reported on `events`, so a UI can render from
    /// the channel alone.
    pub async fn stream(
        &self,
        session_id: &str,
        user_text: &str,
        events: &mpsc::UnboundedSender<ChatEvent>,
    ) -> ChainResult<String> {
        match self.stream_inner(session_id, user_text, events).await {
            Ok(reply) => {
                let _ = events.send(ChatEvent::Completed {
                    reply: reply.clone(),
                });
                Ok(reply)
            }
            Err(err) => {
                error!("Streamed turn failed for session {}: {}", session_id, err);
                let _ = events.send(ChatEvent::Error {
                    message: err.to_string(),
                    is_auth_error: err.is_auth_error(),
                });
                Err(err)
            }
        }
    }

    async fn stream_inner(
        &self,
        session_id: &str,
        user_text: &str,
        events: &mpsc::UnboundedSender<ChatEvent>,
    ) -> ChainResult<String> {
        let (history, messages) = self.prepare(session_id, user_text)?;
        let chain = self.chain;

        let mut stream = chain
            .provider
            .chat_stream(
                messages,
                chain.model.clone(),
                chain.max_tokens,
                chain.temperature,
            )
            .await?;

        let mut streamed = String::new();
        let mut completed: Option<Option<String>> = None;
        while let Some(event) = stream.next().await {
            match event? {
                LLMStreamEvent::TextDelta(delta) => {
                    streamed.push_str(&delta);
                    let _ = events.send(ChatEvent::TextDelta(delta));
                }
                LLMStreamEvent::Completed(response) => {
                    completed = Some(response.content);
                    break;
                }
            }
        }

        let content = match completed {
            Some(content) => content,
            None => {
                warn!("Stream for session {} ended without completion", session_id);
                Some(streamed)
            }
        };
        let reply = non_empty_reply(content)?;
        commit(&history, user_text, &reply);
        info!("Session {} answered ({} chars, streamed)", session_id, reply.len());
        Ok(reply)
    }

    /// Resolve the history and build the prompt. No lock is held afterwards.
    fn prepare(&self, session_id: &str, user_text: &str) -> ChainResult<(SharedHistory, Vec<Message>)> {
        let history = self.resolver.resolve(session_id).ok_or_else(|| {
            warn!("No history for session {}", session_id);
            ChainError::SessionNotFound(session_id.to_string())
        })?;

        let prior = history.read().messages().to_vec();
        debug!(
            "Session {}: {} prior messages, input: {}",
            session_id,
            prior.len(),
            truncate(user_text, 80)
        );

        let template = &self.chain.template;
        let values = PromptValues::new()
            .with_messages(template.history_key(), prior)
            .with_text(template.input_key(), user_text);
        let messages = template.format_messages(&values)?;
        Ok((history, messages))
    }
}

fn non_empty_reply(content: Option<String>) -> ChainResult<String> {
    match content {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(ChainError::EmptyReply),
    }
}

/// Append one exchange atomically
fn commit(history: &SharedHistory, user_text: &str, reply: &str) {
    let mut history = history.write();
    history.add_messages([ChatMessage::human(user_text), ChatMessage::assistant(reply)]);
}
