//! Conduit Providers - Provider query orchestration
//!
//! This crate turns a conversation into one model response, whichever
//! backend serves it:
//! - Native Messages API (direct, Bedrock, Vertex)
//! - OpenAI-compatible chat-completions servers
//!
//! Retry policy, stream reconciliation, format bridging, cost accounting
//! and per-session credential state are handled here; callers only see
//! [`QueryOrchestrator::query_large`] and [`QueryOrchestrator::query_small`].

pub mod anthropic;
pub mod bridge;
mod client;
mod config;
mod cost;
mod error;
mod error_classify;
mod events;
pub mod openai;
mod payload_log;
mod prompt;
mod query;
pub mod reconcile;
mod response_handling;
mod retry;
mod session;
mod verify;

pub use anthropic::{NativeAuth, NativeClient};
pub use client::{CachedClientHandle, ClientRegistry, OpenAIHandle};
pub use config::{RuntimeConfig, CLI_SYSPROMPT_PREFIX, DEFAULT_SMALL_FAST_MODEL};
pub use cost::{
    calculate_cost, rates_for, CostTotals, CostTracker, ModelRates, SessionCostTracker,
    LARGE_MODEL_RATES, SMALL_MODEL_RATES,
};
pub use error::{ApiError, ApiErrorKind, ProviderError};
pub use error_classify::{classify_failure_message, is_overloaded, should_retry, FailureCategory};
pub use events::{EventSink, QueryEvent, TracingEventSink};
pub use openai::OpenAICompatClient;
pub use payload_log::{
    compute_digest, redact_secrets, ApiLogEntry, ApiLogError, ApiLogger, JsonlApiLogger,
    NoopApiLogger,
};
pub use prompt::{format_system_prompt_with_context, system_prompt_block_event};
pub use query::{
    error_message_for, normalize_content, QueryOptions, QueryOrchestrator,
    QueryOrchestratorBuilder, QueryOutcome, SmallQuery, API_ERROR_MESSAGE_PREFIX,
    NO_CONTENT_MESSAGE,
};
pub use reconcile::{reduce_chunk, ReconciledChat, ReconciledNative};
pub use response_handling::api_error_from_parts;
pub use retry::{retry_delay, with_retry, RetryEvent, RetryPolicy};
pub use secrecy::SecretString;
pub use session::{ApiErrorRecord, SessionState};
pub use tokio_util::sync::CancellationToken;
pub use verify::verify_api_key;
