//! Query façade: one entry point per model tier
//!
//! Both entry points resolve the active provider from the configuration
//! snapshot, build the request for the native or the chat-completions
//! path, drive it through the retry scheduler and return a normalized
//! [`ProviderResponse`]. Failures never surface as `Err`: they become
//! assistant responses flagged with `is_api_error`.

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use conduit_config::{resolve_config, ConfigHandle, GlobalConfig};
use conduit_protocol::{
    ContentBlock, ConversationMessage, ModelTier, PromptContext, Provider, ProviderResponse, Role,
    StopReason, TokenUsage, ToolDescriptor, ToolSpec,
};

use crate::anthropic::{
    headers_to_value, split_sys_prompt_prefix, system_blocks, to_wire_messages, MessagesRequest,
    NativeClient, NativeMessage, RequestMetadata, ThinkingConfig,
};
use crate::bridge::{from_chat_completion, to_chat_messages, tools_to_chat_tools};
use crate::client::ClientRegistry;
use crate::config::{RuntimeConfig, CLI_SYSPROMPT_PREFIX};
use crate::cost::{calculate_cost, rates_for, CostTracker, SessionCostTracker};
use crate::error::{ApiErrorKind, ProviderError};
use crate::error_classify::{classify_failure_message, FailureCategory};
use crate::events::{EventSink, QueryEvent, TracingEventSink};
use crate::openai::{
    ChatCompletionRequest, ChatMessage, ChatRole, ChatUsage, OpenAICompatClient, StreamOptions,
    DEFAULT_OPENAI_BASE_URL,
};
use crate::payload_log::{ApiLogError, ApiLogger, JsonlApiLogger};
use crate::prompt::system_prompt_block_event;
use crate::reconcile::{reconcile_chat_stream, reconcile_native_stream, ReconciledChat};
use crate::retry::{with_retry, RetryPolicy};
use crate::session::{ApiErrorRecord, SessionState};

pub const API_ERROR_MESSAGE_PREFIX: &str = "API Error";
pub const PROMPT_TOO_LONG_ERROR_MESSAGE: &str = "Prompt is too long";
pub const CREDIT_BALANCE_TOO_LOW_ERROR_MESSAGE: &str = "Credit balance is too low";
pub const INVALID_API_KEY_ERROR_MESSAGE: &str = "Invalid API key · Please run /login";
pub const NO_CONTENT_MESSAGE: &str = "(no content)";

pub const MAIN_QUERY_TEMPERATURE: f32 = 1.0;
const SMALL_QUERY_TEMPERATURE: f32 = 0.0;
const LARGE_QUERY_MIN_MAX_TOKENS: u32 = 8192;
const SMALL_QUERY_MAX_TOKENS: u32 = 512;

/// Per-call switches for [`QueryOrchestrator::query_large`]
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub model: String,
    pub prepend_cli_sysprompt: bool,
    pub dangerously_skip_permissions: bool,
}

impl QueryOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prepend_cli_sysprompt: true,
            dangerously_skip_permissions: false,
        }
    }
}

/// A single-turn request to the small model
#[derive(Debug, Clone, Default)]
pub struct SmallQuery {
    pub system_prompt: Vec<String>,
    pub user_prompt: String,
    /// Prefill for the assistant turn
    pub assistant_prompt: Option<String>,
    pub enable_prompt_caching: bool,
}

impl SmallQuery {
    pub fn new(user_prompt: impl Into<String>) -> Self {
        Self {
            user_prompt: user_prompt.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Response(ProviderResponse),
    /// The cancellation signal fired before a response was complete
    Aborted,
}

impl QueryOutcome {
    pub fn response(&self) -> Option<&ProviderResponse> {
        match self {
            Self::Response(response) => Some(response),
            Self::Aborted => None,
        }
    }

    pub fn into_response(self) -> Option<ProviderResponse> {
        match self {
            Self::Response(response) => Some(response),
            Self::Aborted => None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

/// What one successful attempt produced, before costing
struct Completed {
    content: Vec<ContentBlock>,
    stop_reason: Option<StopReason>,
    usage: TokenUsage,
    model: Option<String>,
    ttft_ms: Option<u64>,
}

/// Bookkeeping shared by every attempt of one call
struct CallScope {
    tier: ModelTier,
    provider: Provider,
    model: String,
    base_url: String,
    /// Cache counters are billed
    bill_cache: bool,
    started: Instant,
    attempts: AtomicU32,
    request_id: Mutex<String>,
    /// Credential used by the latest attempt, keyed by the tier it was drawn from
    used_key: Mutex<Option<(ModelTier, usize)>>,
}

impl CallScope {
    fn new(
        tier: ModelTier,
        provider: Provider,
        model: String,
        base_url: String,
        bill_cache: bool,
    ) -> Self {
        Self {
            tier,
            provider,
            model,
            base_url,
            bill_cache,
            started: Instant::now(),
            attempts: AtomicU32::new(0),
            request_id: Mutex::new(String::new()),
            used_key: Mutex::new(None),
        }
    }

    fn begin_attempt(&self, attempt: u32) -> String {
        self.attempts.store(attempt, Ordering::Relaxed);
        let request_id = Uuid::new_v4().to_string();
        *self.request_id.lock() = request_id.clone();
        request_id
    }

    fn provider_label(&self) -> String {
        self.provider.to_string()
    }
}

pub struct QueryOrchestratorBuilder {
    config: ConfigHandle,
    runtime: RuntimeConfig,
    session: Option<Arc<SessionState>>,
    cost_tracker: Option<Arc<dyn CostTracker>>,
    api_logger: Option<Arc<dyn ApiLogger>>,
    event_sink: Option<Arc<dyn EventSink>>,
}

impl QueryOrchestratorBuilder {
    pub fn session(mut self, session: Arc<SessionState>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn cost_tracker(mut self, tracker: Arc<dyn CostTracker>) -> Self {
        self.cost_tracker = Some(tracker);
        self
    }

    pub fn api_logger(mut self, logger: Arc<dyn ApiLogger>) -> Self {
        self.api_logger = Some(logger);
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<QueryOrchestrator, ProviderError> {
        let session = self
            .session
            .unwrap_or_else(|| Arc::new(SessionState::new()));
        let registry =
            ClientRegistry::new(self.config.clone(), self.runtime.clone(), session.clone())?;

        Ok(QueryOrchestrator {
            config: self.config,
            runtime: self.runtime,
            session,
            registry,
            cost_tracker: self
                .cost_tracker
                .unwrap_or_else(|| Arc::new(SessionCostTracker::new())),
            api_logger: self
                .api_logger
                .unwrap_or_else(|| Arc::new(JsonlApiLogger::from_env())),
            events: self
                .event_sink
                .unwrap_or_else(|| Arc::new(TracingEventSink)),
        })
    }
}

/// Single entry point for model queries
pub struct QueryOrchestrator {
    config: ConfigHandle,
    runtime: RuntimeConfig,
    session: Arc<SessionState>,
    registry: ClientRegistry,
    cost_tracker: Arc<dyn CostTracker>,
    api_logger: Arc<dyn ApiLogger>,
    events: Arc<dyn EventSink>,
}

impl QueryOrchestrator {
    pub fn builder(config: ConfigHandle, runtime: RuntimeConfig) -> QueryOrchestratorBuilder {
        QueryOrchestratorBuilder {
            config,
            runtime,
            session: None,
            cost_tracker: None,
            api_logger: None,
            event_sink: None,
        }
    }

    /// Builder over the configuration file and the process environment.
    ///
    /// `config_path` overrides the search for `conduit.{jsonc,json,yml,yaml}`
    /// in the working directory and `~/.config/conduit`.
    pub fn load(config_path: Option<&Path>) -> Result<QueryOrchestratorBuilder, ProviderError> {
        let resolved = resolve_config(config_path)
            .map_err(|e| ProviderError::Configuration(format!("{e:#}")))?;
        debug!(path = %resolved.path.display(), format = ?resolved.format, "Loaded configuration");
        Ok(Self::builder(
            ConfigHandle::new(resolved.config),
            RuntimeConfig::from_env(),
        ))
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn runtime(&self) -> &RuntimeConfig {
        &self.runtime
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Query the large model with the full conversation and tool set
    pub async fn query_large(
        &self,
        messages: &[ConversationMessage],
        system_prompt: &[String],
        max_thinking_tokens: u32,
        tools: &[Arc<dyn ToolDescriptor>],
        cancel: &CancellationToken,
        options: &QueryOptions,
    ) -> QueryOutcome {
        let config = self.config.snapshot();

        let mut prompt = system_prompt.to_vec();
        if options.prepend_cli_sysprompt {
            if let Some(first) = split_sys_prompt_prefix(&prompt).first() {
                self.events.emit(system_prompt_block_event(first));
            }
            prompt.insert(0, CLI_SYSPROMPT_PREFIX.to_string());
        }
        let system = split_sys_prompt_prefix(&prompt);

        let context = PromptContext {
            dangerously_skip_permissions: options.dangerously_skip_permissions,
        };
        let tool_specs: Vec<ToolSpec> =
            join_all(tools.iter().map(|tool| tool.to_spec(&context))).await;

        if !config.primary_provider.is_native() {
            let model = config
                .model_name(ModelTier::Large)
                .map(str::to_string)
                .unwrap_or_else(|| options.model.clone());
            let chat = to_chat_messages(&system, messages);
            return self
                .query_openai(&config, ModelTier::Large, model, chat, &tool_specs, cancel)
                .await;
        }

        let caching = self.runtime.prompt_caching;
        let request = MessagesRequest {
            model: options.model.clone(),
            max_tokens: max_thinking_tokens
                .saturating_add(1)
                .max(LARGE_QUERY_MIN_MAX_TOKENS),
            messages: to_wire_messages(messages, caching),
            system: system_blocks(&system, caching),
            tools: tool_specs,
            temperature: MAIN_QUERY_TEMPERATURE,
            thinking: (max_thinking_tokens > 0)
                .then(|| ThinkingConfig::enabled(max_thinking_tokens)),
            metadata: Some(self.metadata()),
            stream: true,
        };
        self.query_native(&config, ModelTier::Large, request, true, cancel)
            .await
    }

    /// Single-turn query against the small model, no tools
    pub async fn query_small(&self, query: SmallQuery, cancel: &CancellationToken) -> QueryOutcome {
        let config = self.config.snapshot();
        let system = split_sys_prompt_prefix(&query.system_prompt);

        if !config.primary_provider.is_native() {
            let model = config
                .model_name(ModelTier::Small)
                .map(str::to_string)
                .unwrap_or_else(|| self.runtime.small_fast_model.clone());
            let mut chat: Vec<ChatMessage> = to_chat_messages(&system, &[]);
            chat.push(ChatMessage::text(ChatRole::User, query.user_prompt));
            return self
                .query_openai(&config, ModelTier::Small, model, chat, &[], cancel)
                .await;
        }

        let caching = query.enable_prompt_caching && self.runtime.prompt_caching;
        let mut messages = vec![ConversationMessage::user(query.user_prompt)];
        if let Some(prefill) = query.assistant_prompt {
            messages.push(ConversationMessage::assistant(prefill));
        }

        let request = MessagesRequest {
            model: self.runtime.small_fast_model.clone(),
            max_tokens: SMALL_QUERY_MAX_TOKENS,
            messages: to_wire_messages(&messages, false),
            system: system_blocks(&system, caching),
            tools: Vec::new(),
            temperature: SMALL_QUERY_TEMPERATURE,
            thinking: None,
            metadata: Some(self.metadata()),
            stream: true,
        };
        self.query_native(&config, ModelTier::Small, request, caching, cancel)
            .await
    }

    fn metadata(&self) -> RequestMetadata {
        RequestMetadata {
            user_id: self.runtime.metadata_user_id(),
        }
    }

    async fn query_native(
        &self,
        config: &GlobalConfig,
        tier: ModelTier,
        request: MessagesRequest,
        bill_cache: bool,
        cancel: &CancellationToken,
    ) -> QueryOutcome {
        let base_url = config
            .base_url(tier)
            .map(str::to_string)
            .unwrap_or_else(|| self.runtime.anthropic_base_url.clone());
        let scope = CallScope::new(
            tier,
            config.primary_provider,
            request.model.clone(),
            base_url,
            bill_cache,
        );
        self.events.emit(QueryEvent::Query {
            model: scope.model.clone(),
            provider: scope.provider_label(),
            message_count: request.messages.len(),
            tool_count: request.tools.len(),
        });

        let result = self
            .retrying(&scope, cancel, |attempt| {
                self.native_attempt(&scope, attempt, &request, cancel)
            })
            .await;
        self.finish(&scope, result)
    }

    async fn query_openai(
        &self,
        config: &GlobalConfig,
        tier: ModelTier,
        model: String,
        messages: Vec<ChatMessage>,
        tool_specs: &[ToolSpec],
        cancel: &CancellationToken,
    ) -> QueryOutcome {
        let stream = config.stream_enabled();
        let tools = tools_to_chat_tools(tool_specs);
        let request = ChatCompletionRequest {
            model: model.clone(),
            messages,
            max_tokens: config.max_tokens_for(tier),
            temperature: match tier {
                ModelTier::Large => MAIN_QUERY_TEMPERATURE,
                ModelTier::Small => SMALL_QUERY_TEMPERATURE,
            },
            tool_choice: (!tools.is_empty()).then(|| "auto".to_string()),
            tools,
            reasoning_effort: match tier {
                ModelTier::Large => config.large_model_reasoning_effort.clone(),
                ModelTier::Small => None,
            },
            stream: stream.then_some(true),
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        };

        let base_url = config
            .resolved_base_url(tier)
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());
        let scope = CallScope::new(tier, config.primary_provider, model, base_url, true);
        self.events.emit(QueryEvent::Query {
            model: scope.model.clone(),
            provider: scope.provider_label(),
            message_count: request.messages.len(),
            tool_count: request.tools.len(),
        });

        let result = self
            .retrying(&scope, cancel, |attempt| {
                self.openai_attempt(&scope, attempt, &request, cancel)
            })
            .await;
        self.finish(&scope, result)
    }

    async fn retrying<F, Fut>(
        &self,
        scope: &CallScope,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<Completed, ProviderError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Completed, ProviderError>>,
    {
        let policy = RetryPolicy::for_mode(self.runtime.benchmark_mode);
        let provider = scope.provider_label();
        with_retry(
            &policy,
            cancel,
            |event| {
                self.events.emit(QueryEvent::Retry {
                    attempt: event.attempt,
                    max_retries: event.max_retries,
                    delay_ms: event.delay_ms,
                    message: event.message.clone(),
                    status: event.status,
                    provider: provider.clone(),
                })
            },
            operation,
        )
        .await
    }

    async fn native_attempt(
        &self,
        scope: &CallScope,
        attempt: u32,
        request: &MessagesRequest,
        cancel: &CancellationToken,
    ) -> Result<Completed, ProviderError> {
        let handle = self.registry.get_handle(&request.model)?;
        *scope.used_key.lock() = handle.key_index.map(|index| (handle.tier, index));
        let client = handle.client;
        let body = client.request_body(request)?;

        let request_id = scope.begin_attempt(attempt);
        self.log_api(
            "request",
            self.api_logger.log_request(
                &request_id,
                &scope.provider_label(),
                &client.endpoint(&request.model),
                &headers_to_value(&client.headers()?),
                &body,
            ),
        );

        let started = Instant::now();
        let outcome = self
            .send_native(&client, &request.model, &body, &request_id, cancel)
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok((message, _)) => self.log_api(
                "response",
                self.api_logger
                    .log_response(&request_id, &native_message_value(message), duration_ms),
            ),
            Err(err) => self.log_attempt_error(&request_id, err, duration_ms),
        }

        let (message, ttft_ms) = outcome?;
        Ok(Completed {
            content: message.content,
            stop_reason: message.stop_reason,
            usage: message.usage,
            model: Some(message.model).filter(|m| !m.is_empty()),
            ttft_ms,
        })
    }

    async fn send_native(
        &self,
        client: &NativeClient,
        model: &str,
        body: &Value,
        request_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(NativeMessage, Option<u64>), ProviderError> {
        let dispatched = Instant::now();
        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Aborted),
            stream = client.create_stream(model, body) => stream?,
        };
        self.log_api("stream_start", self.api_logger.log_stream_start(request_id));

        let logger = Arc::clone(&self.api_logger);
        let chunk_request_id = request_id.to_string();
        let stream = stream.inspect(move |raw| {
            if let Err(err) = logger.log_stream_chunk(&chunk_request_id, raw) {
                warn!(target: "conduit::api_log", error = %err, "Failed to buffer stream chunk");
            }
        });

        let result = reconcile_native_stream(stream, dispatched, cancel).await;
        self.log_api(
            "stream_complete",
            self.api_logger.log_stream_complete(request_id),
        );
        result.map(|reconciled| (reconciled.message, reconciled.ttft_ms))
    }

    async fn openai_attempt(
        &self,
        scope: &CallScope,
        attempt: u32,
        request: &ChatCompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<Completed, ProviderError> {
        let handle = self.registry.openai_client(scope.tier)?;
        *scope.used_key.lock() = handle.key_index.map(|index| (scope.tier, index));
        let client = handle.client;
        let body = serde_json::to_value(request)?;

        let request_id = scope.begin_attempt(attempt);
        self.log_api(
            "request",
            self.api_logger.log_request(
                &request_id,
                &scope.provider_label(),
                &client.endpoint(),
                &headers_to_value(&client.headers()?),
                &body,
            ),
        );

        let started = Instant::now();
        let outcome = if request.stream == Some(true) {
            self.send_chat_stream(&client, &body, &request_id, cancel)
                .await
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ProviderError::Aborted),
                completion = client.create(&body) => completion.map(|completion| ReconciledChat {
                    completion,
                    ttft_ms: None,
                }),
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(reconciled) => match serde_json::to_value(&reconciled.completion) {
                Ok(value) => self.log_api(
                    "response",
                    self.api_logger.log_response(&request_id, &value, duration_ms),
                ),
                Err(err) => self.log_api("response", Err(ApiLogError::from(err))),
            },
            Err(err) => self.log_attempt_error(&request_id, err, duration_ms),
        }

        let ReconciledChat {
            completion,
            ttft_ms,
        } = outcome?;
        let usage = completion.usage.as_ref().map(chat_usage).unwrap_or_default();
        let model = Some(completion.model).filter(|m| !m.is_empty());
        let choice = completion.choices.into_iter().next().unwrap_or_default();

        let bridged = from_chat_completion(&choice);
        if bridged.missing_message {
            warn!(model = %scope.model, provider = %scope.provider, "Chat completion carried no message");
            self.events.emit(QueryEvent::MissingMessage {
                model: scope.model.clone(),
                provider: scope.provider_label(),
            });
        }

        Ok(Completed {
            content: bridged.content,
            stop_reason: bridged.stop_reason,
            usage,
            model,
            ttft_ms,
        })
    }

    async fn send_chat_stream(
        &self,
        client: &OpenAICompatClient,
        body: &Value,
        request_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ReconciledChat, ProviderError> {
        let dispatched = Instant::now();
        let chunks = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Aborted),
            chunks = client.create_stream(body) => chunks?,
        };
        self.log_api("stream_start", self.api_logger.log_stream_start(request_id));

        let result = reconcile_chat_stream(chunks, dispatched, cancel, |chunk| {
            self.log_api(
                "stream_chunk",
                self.api_logger.log_stream_chunk(request_id, chunk),
            )
        })
        .await;
        self.log_api(
            "stream_complete",
            self.api_logger.log_stream_complete(request_id),
        );
        result
    }

    fn finish(&self, scope: &CallScope, result: Result<Completed, ProviderError>) -> QueryOutcome {
        let duration_ms = scope.started.elapsed().as_millis() as u64;
        let attempts = scope.attempts.load(Ordering::Relaxed);
        let request_id = scope.request_id.lock().clone();

        let completed = match result {
            Ok(completed) => completed,
            Err(ProviderError::Aborted) => {
                debug!(model = %scope.model, attempts, "Query aborted");
                return QueryOutcome::Aborted;
            }
            Err(err) => {
                return QueryOutcome::Response(self.error_response(
                    scope,
                    &err,
                    duration_ms,
                    attempts,
                    request_id,
                ))
            }
        };

        let usage = if scope.bill_cache {
            completed.usage
        } else {
            completed.usage.without_cache()
        };
        let cost_usd = calculate_cost(&usage, rates_for(scope.tier));
        self.cost_tracker.add_cost(cost_usd, duration_ms);

        self.events.emit(QueryEvent::Success {
            model: scope.model.clone(),
            provider: scope.provider_label(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cost_usd,
            duration_ms,
            ttft_ms: completed.ttft_ms,
            attempts,
            request_id,
        });

        QueryOutcome::Response(ProviderResponse {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            content: normalize_content(completed.content),
            stop_reason: completed.stop_reason,
            usage,
            model: completed.model.unwrap_or_else(|| scope.model.clone()),
            duration_ms,
            ttft_ms: completed.ttft_ms,
            cost_usd,
            is_api_error: false,
        })
    }

    fn error_response(
        &self,
        scope: &CallScope,
        err: &ProviderError,
        duration_ms: u64,
        attempts: u32,
        request_id: String,
    ) -> ProviderResponse {
        let message = err.to_string();
        let api_error = err.as_api_error();
        let status = api_error.and_then(|e| e.status);

        let used_key = *scope.used_key.lock();
        if api_error.is_some_and(|e| e.kind == ApiErrorKind::Authentication) {
            if let Some((key_tier, index)) = used_key {
                if self.session.mark_key_failed(key_tier, index) {
                    warn!(tier = %key_tier, index, "Marked API key as failed");
                }
                self.registry.reset_client();
            }
        }

        self.session.record_api_error(ApiErrorRecord {
            timestamp: Utc::now(),
            provider: scope.provider_label(),
            base_url: scope.base_url.clone(),
            message: message.clone(),
            status,
            details: format!("{err:?}"),
        });

        self.events.emit(QueryEvent::Error {
            model: scope.model.clone(),
            provider: scope.provider_label(),
            message: message.clone(),
            status,
            duration_ms,
            attempts,
            request_id,
        });

        let mut response = ProviderResponse::api_error(error_message_for(&message, &scope.base_url));
        response.model = scope.model.clone();
        response.duration_ms = duration_ms;
        response
    }

    fn log_attempt_error(&self, request_id: &str, err: &ProviderError, duration_ms: u64) {
        let status = err.as_api_error().and_then(|e| e.status);
        self.log_api(
            "error",
            self.api_logger
                .log_error(request_id, &err.to_string(), status, duration_ms),
        );
    }

    fn log_api(&self, stage: &str, result: Result<(), ApiLogError>) {
        if let Err(err) = result {
            warn!(target: "conduit::api_log", stage, error = %err, "Failed to write API log entry");
        }
    }
}

/// User-facing text for a failed call
pub fn error_message_for(message: &str, base_url: &str) -> String {
    match classify_failure_message(message) {
        FailureCategory::PromptTooLong => format!("{PROMPT_TOO_LONG_ERROR_MESSAGE} ({base_url})"),
        FailureCategory::CreditBalanceTooLow => {
            format!("{CREDIT_BALANCE_TOO_LOW_ERROR_MESSAGE} ({base_url})")
        }
        FailureCategory::InvalidApiKey => format!("{INVALID_API_KEY_ERROR_MESSAGE} ({base_url})"),
        FailureCategory::Other => format!("{API_ERROR_MESSAGE_PREFIX} from {base_url}: {message}"),
    }
}

/// Drop empty text blocks; an empty result becomes a placeholder
pub fn normalize_content(content: Vec<ContentBlock>) -> Vec<ContentBlock> {
    let content: Vec<ContentBlock> = content
        .into_iter()
        .filter(|block| !matches!(block, ContentBlock::Text { text } if text.is_empty()))
        .collect();
    if content.is_empty() {
        vec![ContentBlock::text(NO_CONTENT_MESSAGE)]
    } else {
        content
    }
}

fn chat_usage(usage: &ChatUsage) -> TokenUsage {
    let cached = usage.cached_tokens();
    TokenUsage {
        input_tokens: usage.prompt_tokens.saturating_sub(cached),
        output_tokens: usage.completion_tokens,
        cache_read_tokens: cached,
        cache_creation_tokens: 0,
    }
}

fn native_message_value(message: &NativeMessage) -> Value {
    json!({
        "id": message.id,
        "model": message.model,
        "content": message.content,
        "stop_reason": message.stop_reason,
        "usage": message.usage,
    })
}
