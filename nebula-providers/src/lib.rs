//! Remote language-model providers for nebula
//!
//! This crate defines the provider boundary ([`LLMProvider`]) and an
//! OpenAI-compatible chat-completions client.

pub mod base;
pub mod openai;

pub use base::{
    LLMProvider, LLMResponse, LLMStreamEvent, Message, ProviderError, ProviderEventStream,
    ProviderResult,
};
pub use openai::OpenAIClient;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

/// A provider that allows hot-swapping the underlying implementation,
/// e.g. after the user re-enters a rejected API key.
pub struct DynamicProvider {
    inner: RwLock<Arc<dyn LLMProvider>>,
}

impl DynamicProvider {
    /// Create a new dynamic provider
    pub fn new(initial: Arc<dyn LLMProvider>) -> Self {
        Self {
            inner: RwLock::new(initial),
        }
    }

    /// Update the underlying provider
    pub fn update(&self, new_provider: Arc<dyn LLMProvider>) {
        *self.inner.write() = new_provider;
    }

    /// Get the current provider
    pub fn current(&self) -> Arc<dyn LLMProvider> {
        self.inner.read().clone()
    }
}

#[async_trait]
impl LLMProvider for DynamicProvider {
    async fn chat(
        &self,
        messages: Vec<Message>,
        model: Option<String>,
        max_tokens: Option<u32>,
        temperature: f64,
    ) -> ProviderResult<LLMResponse> {
        let provider = self.current();
        provider.chat(messages, model, max_tokens, temperature).await
    }

    async fn chat_stream(
        &self,
        messages: Vec<Message>,
        model: Option<String>,
        max_tokens: Option<u32>,
        temperature: f64,
    ) -> ProviderResult<ProviderEventStream> {
        let provider = self.current();
        provider
            .chat_stream(messages, model, max_tokens, temperature)
            .await
    }

    fn get_default_model(&self) -> String {
        self.current().get_default_model()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Named(&'static str);

    #[async_trait]
    impl LLMProvider for Named {
        async fn chat(
            &self,
            _messages: Vec<Message>,
            _model: Option<String>,
            _max_tokens: Option<u32>,
            _temperature: f64,
        ) -> ProviderResult<LLMResponse> {
            Ok(LLMResponse {
                content: Some(self.0.to_string()),
                finish_reason: "stop".to_string(),
                usage: HashMap::new(),
            })
        }

        fn get_default_model(&self) -> String {
            self.0.to_string()
        }
    }

    #[tokio::test]
    async fn test_dynamic_provider_swaps_inner() {
        let provider = DynamicProvider::new(Arc::new(Named("first")));
        let reply = provider.chat(vec![], None, None, 0.0).await.unwrap();
        assert_eq!(reply.content.as_deref(), Some("first"));

        provider.update(Arc::new(Named("second")));
        let reply = provider.chat(vec![], None, None, 0.0).await.unwrap();
        assert_eq!(reply.content.as_deref(), Some("second"));
        assert_eq!(provider.get_default_model(), "second");
    }
}
