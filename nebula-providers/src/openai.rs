//! OpenAI-compatible chat-completions client

use async_trait::async_trait;
use nebula_core::config::ProviderConfig;
use nebula_core::credential::Credential;
use nebula_core::utils::redact_secrets;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::base::{
    LLMProvider, LLMResponse, LLMStreamEvent, Message, ProviderError, ProviderEventStream,
    ProviderResult,
};

/// Chat-completions request body
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f64,
}

/// Chat-completions response body
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: i64,
    #[serde(default)]
    completion_tokens: i64,
    #[serde(default)]
    total_tokens: i64,
}

impl Usage {
    fn into_map(self) -> HashMap<String, i64> {
        let mut usage = HashMap::new();
        usage.insert("prompt_tokens".to_string(), self.prompt_tokens);
        usage.insert("completion_tokens".to_string(), self.completion_tokens);
        usage.insert("total_tokens".to_string(), self.total_tokens);
        usage
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// `{"error": {"message": "..."}}` envelope used for API errors
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// OpenAI-compatible provider client
pub struct OpenAIClient {
    client: Client,
    api_base: String,
    api_key: Credential,
    default_model: String,
    extra_headers: HashMap<String, String>,
    timeout_secs: u64,
}

impl OpenAIClient {
    /// Create a client for the public OpenAI endpoint
    pub fn new(api_key: Credential, default_model: impl Into<String>) -> Self {
        let defaults = ProviderConfig::default();
        Self::from_config(&defaults, api_key, default_model)
    }

    /// Create a client from the provider section of the configuration
    pub fn from_config(
        config: &ProviderConfig,
        api_key: Credential,
        default_model: impl Into<String>,
    ) -> Self {
        let api_base = config.api_base.trim().trim_end_matches('/').to_string();
        Self {
            client: build_http_client(config.timeout_secs),
            api_base,
            api_key,
            default_model: default_model.into(),
            extra_headers: config.extra_headers.clone(),
            timeout_secs: config.timeout_secs,
        }
    }

    /// Point the client at another OpenAI-compatible endpoint
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Change the whole-request timeout
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self.client = build_http_client(timeout_secs);
        self
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }

    fn build_request(
        &self,
        messages: Vec<Message>,
        model: String,
        max_tokens: Option<u32>,
        temperature: f64,
        stream: bool,
    ) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model,
            messages,
            stream: if stream { Some(true) } else { None },
            max_tokens,
            temperature,
        }
    }

    fn apply_headers(&self, mut req_builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req_builder = req_builder.bearer_auth(self.api_key.expose());

        for (key, value) in &self.extra_headers {
            req_builder = req_builder.header(key, value);
        }

        req_builder
    }

    /// Send the request and turn transport and HTTP failures into provider errors
    async fn send(&self, request: &ChatCompletionRequest) -> ProviderResult<reqwest::Response> {
        let req_builder = self.apply_headers(self.client.post(self.endpoint()).json(request));

        let response = req_builder
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(error_from_status(status, &body))
    }

    fn map_transport_error(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.timeout_secs)
        } else {
            ProviderError::HttpError(err)
        }
    }

    /// Parse a chat-completions response into our standard format
    fn parse_response(response: ChatCompletionResponse) -> ProviderResult<LLMResponse> {
        let ChatCompletionResponse { choices, usage } = response;
        let choice = choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".to_string()))?;

        Ok(LLMResponse {
            content: choice.message.content,
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
            usage: usage.into_map(),
        })
    }

    fn parse_sse_events(buffer: &mut String) -> Vec<String> {
        if buffer.contains("\r\n") {
            *buffer = buffer.replace("\r\n", "\n");
        }

        let mut events = Vec::new();
        while let Some(pos) = buffer.find("\n\n") {
            let raw = buffer[..pos].to_string();
            buffer.drain(..pos + 2);

            let data_lines: Vec<&str> = raw
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(str::trim)
                .collect();

            if !data_lines.is_empty() {
                events.push(data_lines.join("\n"));
            }
        }
        events
    }

    fn finalize_stream(
        content: String,
        finish_reason: Option<String>,
        usage: Option<Usage>,
    ) -> LLMResponse {
        LLMResponse {
            content: if content.is_empty() {
                None
            } else {
                Some(content)
            },
            finish_reason: finish_reason.unwrap_or_else(|| "stop".to_string()),
            usage: usage.map(Usage::into_map).unwrap_or_default(),
        }
    }
}

fn build_http_client(timeout_secs: u64) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Move the decodable prefix of `pending` into `buffer`, keeping a split
/// multi-byte character for the next chunk.
fn drain_utf8(pending: &mut Vec<u8>, buffer: &mut String) {
    let valid = match std::str::from_utf8(pending) {
        Ok(_) => pending.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => pending.len(),
    };
    buffer.push_str(&String::from_utf8_lossy(&pending[..valid]));
    pending.drain(..valid);
}

/// Map a non-success HTTP status and its body to a provider error
fn error_from_status(status: StatusCode, body: &str) -> ProviderError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.trim().to_string());
    let message = redact_secrets(&message);

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            warn!("Provider rejected the API key (HTTP {})", status.as_u16());
            ProviderError::Unauthorized(message)
        }
        _ => ProviderError::ApiError {
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl LLMProvider for OpenAIClient {
    async fn chat(
        &self,
        messages: Vec<Message>,
        model: Option<String>,
        max_tokens: Option<u32>,
        temperature: f64,
    ) -> ProviderResult<LLMResponse> {
        let model = model.unwrap_or_else(|| self.default_model.clone());
        debug!(
            "Sending chat request to {} with model {} ({} messages)",
            self.api_base,
            model,
            messages.len()
        );

        let request = self.build_request(messages, model, max_tokens, temperature, false);
        let response = self.send(&request).await?;

        let body = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        let response_data: ChatCompletionResponse = serde_json::from_str(&body)?;
        Self::parse_response(response_data)
    }

    async fn chat_stream(
        &self,
        messages: Vec<Message>,
        model: Option<String>,
        max_tokens: Option<u32>,
        temperature: f64,
    ) -> ProviderResult<ProviderEventStream> {
        let model = model.unwrap_or_else(|| self.default_model.clone());
        debug!(
            "Sending streaming chat request to {} with model {}",
            self.api_base, model
        );

        let request = self.build_request(messages, model, max_tokens, temperature, true);
        let response = self.send(&request).await?;
        let timeout_secs = self.timeout_secs;

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut response = response;
            let mut pending = Vec::new();
            let mut buffer = String::new();
            let mut content = String::new();
            let mut finish_reason: Option<String> = None;
            let mut usage: Option<Usage> = None;

            loop {
                let (chunk, finished) = match response.chunk().await {
                    Ok(Some(bytes)) => (Some(bytes), false),
                    Ok(None) => (None, true),
                    Err(err) => {
                        let err = if err.is_timeout() {
                            ProviderError::Timeout(timeout_secs)
                        } else {
                            ProviderError::HttpError(err)
                        };
                        let _ = tx.send(Err(err));
                        return;
                    }
                };

                if let Some(chunk) = chunk {
                    pending.extend_from_slice(&chunk);
                }
                drain_utf8(&mut pending, &mut buffer);
                if finished {
                    // the last frame may lack its terminating blank line
                    buffer.push_str(&String::from_utf8_lossy(&pending));
                    pending.clear();
                    buffer.push_str("\n\n");
                }

                for payload in Self::parse_sse_events(&mut buffer) {
                    if payload == "[DONE]" {
                        let final_response = Self::finalize_stream(
                            std::mem::take(&mut content),
                            finish_reason.take(),
                            usage.take(),
                        );
                        let _ = tx.send(Ok(LLMStreamEvent::Completed(final_response)));
                        return;
                    }

                    let parsed = match serde_json::from_str::<StreamChunk>(&payload) {
                        Ok(chunk) => chunk,
                        Err(err) => {
                            let _ = tx.send(Err(ProviderError::JsonError(err)));
                            return;
                        }
                    };

                    if parsed.usage.is_some() {
                        usage = parsed.usage;
                    }

                    if let Some(choice) = parsed.choices.into_iter().next() {
                        if choice.finish_reason.is_some() {
                            finish_reason = choice.finish_reason;
                        }
                        if let Some(delta_text) = choice.delta.content {
                            if !delta_text.is_empty() {
                                content.push_str(&delta_text);
                                let _ = tx.send(Ok(LLMStreamEvent::TextDelta(delta_text)));
                            }
                        }
                    }
                }

                if finished {
                    break;
                }
            }

            // Connection closed without [DONE]
            let final_response = Self::finalize_stream(content, finish_reason, usage);
            let _ = tx.send(Ok(LLMStreamEvent::Completed(final_response)));
        });

        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })))
    }

    fn get_default_model(&self) -> String {
        self.default_model.clone()
    }
}
