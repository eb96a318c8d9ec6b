//! Analytics events emitted by the query path

use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueryEvent {
    Query {
        model: String,
        provider: String,
        message_count: usize,
        tool_count: usize,
    },
    Retry {
        attempt: u32,
        max_retries: u32,
        delay_ms: u64,
        message: String,
        status: Option<u16>,
        provider: String,
    },
    Success {
        model: String,
        provider: String,
        input_tokens: u64,
        output_tokens: u64,
        cost_usd: f64,
        duration_ms: u64,
        ttft_ms: Option<u64>,
        attempts: u32,
        request_id: String,
    },
    Error {
        model: String,
        provider: String,
        message: String,
        status: Option<u16>,
        duration_ms: u64,
        attempts: u32,
        request_id: String,
    },
    /// First system prompt block, identified by digest rather than content
    SystemPromptBlock {
        snippet: String,
        length: usize,
        hash: String,
    },
    /// A chat completion arrived without a message
    MissingMessage { model: String, provider: String },
}

/// Receives analytics events; implementations must not block
pub trait EventSink: Send + Sync {
    fn emit(&self, event: QueryEvent);
}

/// Writes events to the tracing subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: QueryEvent) {
        match &event {
            QueryEvent::Error { .. } | QueryEvent::MissingMessage { .. } => {
                warn!(target: "conduit::events", event = ?event, "query event")
            }
            QueryEvent::Retry { .. } => debug!(target: "conduit::events", event = ?event, "query event"),
            _ => info!(target: "conduit::events", event = ?event, "query event"),
        }
    }
}
