//! Environment-driven runtime settings

use conduit_protocol::{NativeBackend, SessionId};
use secrecy::SecretString;
use std::time::Duration;

pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_SMALL_FAST_MODEL: &str = "claude-3-5-haiku-20241022";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_AWS_REGION: &str = "us-east-1";
pub const FALLBACK_VERTEX_REGION: &str = "us-east5";

/// Prepended to the system prompt when a query asks for it
pub const CLI_SYSPROMPT_PREFIX: &str =
    "You are an interactive CLI coding assistant running in the user's terminal.";

/// Model-name prefixes with their own Vertex region variable
const VERTEX_REGION_OVERRIDES: &[(&str, &str)] = &[
    ("claude-3-5-haiku", "VERTEX_REGION_CLAUDE_3_5_HAIKU"),
    ("claude-3-5-sonnet", "VERTEX_REGION_CLAUDE_3_5_SONNET"),
    ("claude-3-7-sonnet", "VERTEX_REGION_CLAUDE_3_7_SONNET"),
];

/// Process-level switches that come from the environment rather than the
/// configuration file
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Relaxes the retry ceiling and retries overloaded errors
    pub benchmark_mode: bool,
    pub prompt_caching: bool,
    pub request_timeout: Duration,
    pub native_backend: NativeBackend,
    pub anthropic_base_url: String,
    /// Bearer token used instead of an API key on the direct backend
    pub anthropic_auth_token: Option<SecretString>,
    pub bedrock_base_url: Option<String>,
    pub bedrock_token: Option<SecretString>,
    pub aws_region: String,
    pub vertex_base_url: Option<String>,
    pub vertex_project_id: Option<String>,
    pub vertex_access_token: Option<SecretString>,
    pub cloud_ml_region: Option<String>,
    /// (model prefix, region) pairs resolved from the per-model variables
    pub vertex_region_overrides: Vec<(String, String)>,
    pub user_id: Option<String>,
    pub session_id: SessionId,
    pub small_fast_model: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            benchmark_mode: false,
            prompt_caching: true,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            native_backend: NativeBackend::Direct,
            anthropic_base_url: DEFAULT_ANTHROPIC_BASE_URL.to_string(),
            anthropic_auth_token: None,
            bedrock_base_url: None,
            bedrock_token: None,
            aws_region: DEFAULT_AWS_REGION.to_string(),
            vertex_base_url: None,
            vertex_project_id: None,
            vertex_access_token: None,
            cloud_ml_region: None,
            vertex_region_overrides: Vec::new(),
            user_id: None,
            session_id: SessionId::new(),
            small_fast_model: DEFAULT_SMALL_FAST_MODEL.to_string(),
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| lookup(key).map(|v| is_truthy(&v)).unwrap_or(false);
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let native_backend = if flag("CONDUIT_USE_BEDROCK") {
            NativeBackend::Bedrock
        } else if flag("CONDUIT_USE_VERTEX") {
            NativeBackend::Vertex
        } else {
            NativeBackend::Direct
        };

        let request_timeout = non_empty("API_TIMEOUT_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS));

        let vertex_region_overrides = VERTEX_REGION_OVERRIDES
            .iter()
            .filter_map(|&(prefix, var)| non_empty(var).map(|region| (prefix.to_string(), region)))
            .collect();

        Self {
            benchmark_mode: flag("CONDUIT_BENCHMARK_MODE"),
            prompt_caching: lookup("DISABLE_PROMPT_CACHING").is_none(),
            request_timeout,
            native_backend,
            anthropic_base_url: non_empty("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_BASE_URL.to_string()),
            anthropic_auth_token: non_empty("ANTHROPIC_AUTH_TOKEN").map(SecretString::from),
            bedrock_base_url: non_empty("ANTHROPIC_BEDROCK_BASE_URL"),
            bedrock_token: non_empty("AWS_BEARER_TOKEN_BEDROCK").map(SecretString::from),
            aws_region: non_empty("AWS_REGION")
                .or_else(|| non_empty("AWS_DEFAULT_REGION"))
                .unwrap_or_else(|| DEFAULT_AWS_REGION.to_string()),
            vertex_base_url: non_empty("ANTHROPIC_VERTEX_BASE_URL"),
            vertex_project_id: non_empty("ANTHROPIC_VERTEX_PROJECT_ID"),
            vertex_access_token: non_empty("VERTEX_ACCESS_TOKEN").map(SecretString::from),
            cloud_ml_region: non_empty("CLOUD_ML_REGION"),
            vertex_region_overrides,
            user_id: non_empty("CONDUIT_USER_ID"),
            session_id: SessionId::new(),
            small_fast_model: non_empty("CONDUIT_SMALL_FAST_MODEL")
                .unwrap_or_else(|| DEFAULT_SMALL_FAST_MODEL.to_string()),
        }
    }

    pub fn with_benchmark_mode(mut self, enabled: bool) -> Self {
        self.benchmark_mode = enabled;
        self
    }

    pub fn with_prompt_caching(mut self, enabled: bool) -> Self {
        self.prompt_caching = enabled;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_native_backend(mut self, backend: NativeBackend) -> Self {
        self.native_backend = backend;
        self
    }

    pub fn with_anthropic_base_url(mut self, url: impl Into<String>) -> Self {
        self.anthropic_base_url = url.into();
        self
    }

    pub fn with_bedrock(mut self, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        self.bedrock_base_url = Some(base_url.into());
        self.bedrock_token = Some(SecretString::from(token.into()));
        self
    }

    pub fn with_vertex(
        mut self,
        base_url: impl Into<String>,
        project_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        self.vertex_base_url = Some(base_url.into());
        self.vertex_project_id = Some(project_id.into());
        self.vertex_access_token = Some(SecretString::from(token.into()));
        self
    }

    pub fn with_small_fast_model(mut self, model: impl Into<String>) -> Self {
        self.small_fast_model = model.into();
        self
    }

    /// Vertex region for a model: model-specific override, then
    /// `CLOUD_ML_REGION`, then the configured default, then `us-east5`
    pub fn vertex_region_for(&self, model: &str, configured: Option<&str>) -> String {
        self.vertex_region_overrides
            .iter()
            .find(|(prefix, _)| model.starts_with(prefix.as_str()))
            .map(|(_, region)| region.clone())
            .or_else(|| self.cloud_ml_region.clone())
            .or_else(|| configured.map(str::to_string))
            .unwrap_or_else(|| FALLBACK_VERTEX_REGION.to_string())
    }

    /// `metadata.user_id` sent with large-model requests
    pub fn metadata_user_id(&self) -> String {
        match &self.user_id {
            Some(user) => format!("user_{}_session_{}", user, self.session_id),
            None => format!("session_{}", self.session_id),
        }
    }
}
