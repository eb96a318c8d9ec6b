//! Native Messages API client (direct, Bedrock and Vertex backends)

pub mod payload;
pub mod stream;

use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::debug;

use conduit_protocol::NativeBackend;

use crate::config::RuntimeConfig;
use crate::error::ProviderError;
use crate::response_handling::api_error_from_response;

pub use payload::{
    split_sys_prompt_prefix, system_blocks, to_wire_messages, CacheControl, MessagesRequest,
    RequestMetadata, SystemBlock, ThinkingConfig, WireBlock, WireMessage,
};
pub use stream::{
    FullMessage, MessageAccumulator, NativeMessage, NativeMessageStream, StreamEvent,
};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const VERTEX_ANTHROPIC_VERSION: &str = "vertex-2023-10-16";
pub const BEDROCK_ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

/// Credential attached to native requests
#[derive(Debug, Clone)]
pub enum NativeAuth {
    ApiKey(SecretString),
    Bearer(SecretString),
}

#[derive(Debug, Clone)]
enum Target {
    Direct {
        base_url: String,
    },
    Bedrock {
        base_url: String,
    },
    Vertex {
        base_url: Option<String>,
        project_id: String,
        configured_region: Option<String>,
    },
}

/// Client for one native backend.
///
/// Never retries; the retry driver owns that.
#[derive(Debug, Clone)]
pub struct NativeClient {
    http: Client,
    target: Target,
    auth: NativeAuth,
    runtime: RuntimeConfig,
}

impl NativeClient {
    pub fn new(
        http: Client,
        backend: NativeBackend,
        auth: NativeAuth,
        runtime: &RuntimeConfig,
        configured_vertex_region: Option<String>,
    ) -> Result<Self, ProviderError> {
        let target = match backend {
            NativeBackend::Direct => Target::Direct {
                base_url: runtime.anthropic_base_url.trim_end_matches('/').to_string(),
            },
            NativeBackend::Bedrock => Target::Bedrock {
                base_url: runtime
                    .bedrock_base_url
                    .clone()
                    .unwrap_or_else(|| {
                        format!("https://bedrock-runtime.{}.amazonaws.com", runtime.aws_region)
                    })
                    .trim_end_matches('/')
                    .to_string(),
            },
            NativeBackend::Vertex => Target::Vertex {
                base_url: runtime
                    .vertex_base_url
                    .as_ref()
                    .map(|url| url.trim_end_matches('/').to_string()),
                project_id: runtime.vertex_project_id.clone().ok_or_else(|| {
                    ProviderError::Configuration(
                        "ANTHROPIC_VERTEX_PROJECT_ID is required for Vertex".to_string(),
                    )
                })?,
                configured_region: configured_vertex_region,
            },
        };

        Ok(Self {
            http,
            target,
            auth,
            runtime: runtime.clone(),
        })
    }

    pub fn backend(&self) -> NativeBackend {
        match self.target {
            Target::Direct { .. } => NativeBackend::Direct,
            Target::Bedrock { .. } => NativeBackend::Bedrock,
            Target::Vertex { .. } => NativeBackend::Vertex,
        }
    }

    /// Full request URL for `model`
    pub fn endpoint(&self, model: &str) -> String {
        match &self.target {
            Target::Direct { base_url } => format!("{base_url}/v1/messages"),
            Target::Bedrock { base_url } => format!("{base_url}/model/{model}/invoke"),
            Target::Vertex {
                base_url,
                project_id,
                configured_region,
            } => {
                let region = self
                    .runtime
                    .vertex_region_for(model, configured_region.as_deref());
                let base = base_url
                    .clone()
                    .unwrap_or_else(|| format!("https://{region}-aiplatform.googleapis.com"));
                format!(
                    "{base}/v1/projects/{project_id}/locations/{region}/publishers/anthropic/models/{model}:streamRawPredict"
                )
            }
        }
    }

    /// Body as sent to this backend
    pub fn request_body(&self, request: &MessagesRequest) -> Result<Value, ProviderError> {
        let mut body = serde_json::to_value(request)?;
        if let Value::Object(map) = &mut body {
            match self.target {
                Target::Direct { .. } => {}
                Target::Vertex { .. } => {
                    map.remove("model");
                    map.insert("anthropic_version".into(), json!(VERTEX_ANTHROPIC_VERSION));
                }
                Target::Bedrock { .. } => {
                    map.remove("model");
                    map.remove("stream");
                    map.insert("anthropic_version".into(), json!(BEDROCK_ANTHROPIC_VERSION));
                }
            }
        }
        Ok(body)
    }

    pub fn headers(&self) -> Result<HeaderMap, ProviderError> {
        let invalid = |_| ProviderError::Configuration("Invalid API key format".into());
        let mut headers = HeaderMap::new();
        match &self.auth {
            NativeAuth::ApiKey(key) => {
                headers.insert(
                    "x-api-key",
                    HeaderValue::from_str(key.expose_secret()).map_err(invalid)?,
                );
            }
            NativeAuth::Bearer(token) => {
                headers.insert(
                    AUTHORIZATION,
                    HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                        .map_err(invalid)?,
                );
            }
        }
        if matches!(self.target, Target::Direct { .. }) {
            headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        }
        Ok(headers)
    }

    /// Send `body` and return the response as an event stream.
    ///
    /// Bedrock answers in one piece; its response is replayed as events.
    pub async fn create_stream(
        &self,
        model: &str,
        body: &Value,
    ) -> Result<NativeMessageStream, ProviderError> {
        let url = self.endpoint(model);
        debug!(backend = %self.backend(), url = %url, "Sending native request");

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

        if let Target::Bedrock { .. } = self.target {
            let message: FullMessage = response.json().await?;
            return Ok(NativeMessageStream::from_message(message));
        }

        let events = response
            .bytes_stream()
            .eventsource()
            .filter_map(|event| async move {
                match event {
                    Ok(event) if event.data.trim().is_empty() => None,
                    Ok(event) => Some(serde_json::from_str::<Value>(&event.data).map_err(|e| {
                        ProviderError::MalformedStream(format!("invalid event data: {e}"))
                    })),
                    Err(eventsource_stream::EventStreamError::Transport(err)) => {
                        Some(Err(ProviderError::from(err)))
                    }
                    Err(err) => Some(Err(ProviderError::MalformedStream(err.to_string()))),
                }
            })
            .boxed();

        Ok(NativeMessageStream::new(events))
    }
}

/// Header map as a JSON object for the raw logger
pub fn headers_to_value(headers: &HeaderMap) -> Value {
    Value::Object(
        headers
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    Value::String(value.to_str().unwrap_or_default().to_string()),
                )
            })
            .collect(),
    )
}
