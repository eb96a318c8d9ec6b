//! OpenAI-compatible chat-completions client

pub mod wire;

use eventsource_stream::Eventsource;
use futures::future;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::debug;

use conduit_protocol::Provider;

use crate::error::ProviderError;
use crate::response_handling::api_error_from_response;

pub use wire::{
    ChatChoice, ChatCompletion, ChatCompletionMessage, ChatCompletionRequest, ChatFunction,
    ChatFunctionCall, ChatMessage, ChatRole, ChatTool, ChatToolCall, ChatUsage,
    PromptTokensDetails, StreamOptions,
};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Raw `chat.completion.chunk` objects, ending at `[DONE]`
pub type ChatChunkStream = BoxStream<'static, Result<Value, ProviderError>>;

/// Client for any server speaking the chat-completions protocol
#[derive(Debug, Clone)]
pub struct OpenAICompatClient {
    http: Client,
    provider: Provider,
    base_url: String,
    api_key: Option<SecretString>,
}

impl OpenAICompatClient {
    pub fn new(
        http: Client,
        provider: Provider,
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
    ) -> Self {
        Self {
            http,
            provider,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    pub fn headers(&self) -> Result<HeaderMap, ProviderError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &self.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", key.expose_secret()))
                    .map_err(|_| ProviderError::Configuration("Invalid API key format".into()))?,
            );
        }
        Ok(headers)
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, ProviderError> {
        let url = self.endpoint();
        debug!(provider = %self.provider, url = %url, "Sending chat completion request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error_from_response(response).await.into());
        }
        Ok(response)
    }

    pub async fn create(&self, body: &Value) -> Result<ChatCompletion, ProviderError> {
        let response = self.send(body).await?;
        Ok(response.json().await?)
    }

    pub async fn create_stream(&self, body: &Value) -> Result<ChatChunkStream, ProviderError> {
        let response = self.send(body).await?;

        let chunks = response
            .bytes_stream()
            .eventsource()
            .take_while(|event| {
                future::ready(!matches!(event, Ok(e) if e.data.trim() == "[DONE]"))
            })
            .filter_map(|event| async move {
                match event {
                    Ok(event) if event.data.trim().is_empty() => None,
                    Ok(event) => Some(serde_json::from_str::<Value>(&event.data).map_err(|e| {
                        ProviderError::MalformedStream(format!("invalid chunk data: {e}"))
                    })),
                    Err(eventsource_stream::EventStreamError::Transport(err)) => {
                        Some(Err(ProviderError::from(err)))
                    }
                    Err(err) => Some(Err(ProviderError::MalformedStream(err.to_string()))),
                }
            })
            .boxed();

        Ok(chunks)
    }
}
