//! Native streaming events and message aggregation

use conduit_protocol::{ContentBlock, StopReason, TokenUsage};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ProviderError;
use crate::response_handling::api_error_from_stream;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WireUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: Option<u64>,
    #[serde(default)]
    pub cache_creation_input_tokens: Option<u64>,
}

impl From<&WireUsage> for TokenUsage {
    fn from(usage: &WireUsage) -> Self {
        TokenUsage {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_read_tokens: usage.cache_read_input_tokens.unwrap_or(0),
            cache_creation_tokens: usage.cache_creation_input_tokens.unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageStartPayload {
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub usage: WireUsage,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[allow(clippy::enum_variant_names)]
pub enum BlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageDeltaPayload {
    #[serde(default)]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamErrorPayload {
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        message: MessageStartPayload,
    },
    ContentBlockStart {
        index: usize,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: MessageDeltaPayload,
        #[serde(default)]
        usage: Option<WireUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: StreamErrorPayload,
    },
    #[serde(other)]
    Unknown,
}

pub fn parse_stop_reason(reason: &str) -> StopReason {
    match reason {
        "max_tokens" => StopReason::MaxTokens,
        "stop_sequence" => StopReason::StopSequence,
        "tool_use" => StopReason::ToolUse,
        "refusal" => StopReason::ContentFilter,
        _ => StopReason::EndTurn,
    }
}

/// A fully aggregated native response
#[derive(Debug, Clone, PartialEq)]
pub struct NativeMessage {
    pub id: String,
    pub model: String,
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<StopReason>,
    pub usage: TokenUsage,
}

/// Complete, non-streamed response body (Bedrock invoke)
#[derive(Debug, Clone, Deserialize)]
pub struct FullMessage {
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: WireUsage,
}

impl FullMessage {
    /// The event sequence a streamed delivery of this message would have produced
    pub fn into_events(self) -> Vec<Value> {
        let mut events = Vec::with_capacity(self.content.len() * 2 + 3);
        events.push(json!({
            "type": "message_start",
            "message": {
                "id": self.id,
                "model": self.model,
                "usage": {
                    "input_tokens": self.usage.input_tokens,
                    "output_tokens": 0,
                    "cache_read_input_tokens": self.usage.cache_read_input_tokens,
                    "cache_creation_input_tokens": self.usage.cache_creation_input_tokens,
                },
            },
        }));
        for (index, block) in self.content.into_iter().enumerate() {
            events.push(json!({"type": "content_block_start", "index": index, "content_block": block}));
            events.push(json!({"type": "content_block_stop", "index": index}));
        }
        events.push(json!({
            "type": "message_delta",
            "delta": {"stop_reason": self.stop_reason},
            "usage": {"output_tokens": self.usage.output_tokens},
        }));
        events.push(json!({"type": "message_stop"}));
        events
    }
}

#[derive(Debug)]
struct PartialBlock {
    block: ContentBlock,
    partial_json: String,
}

/// Folds stream events into a [`NativeMessage`]
#[derive(Debug, Default)]
pub struct MessageAccumulator {
    id: Option<String>,
    model: String,
    blocks: Vec<PartialBlock>,
    stop_reason: Option<StopReason>,
    usage: TokenUsage,
}

impl MessageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn block_mut(&mut self, index: usize) -> Result<&mut PartialBlock, ProviderError> {
        self.blocks.get_mut(index).ok_or_else(|| {
            ProviderError::MalformedStream(format!("delta for unknown content block {index}"))
        })
    }

    pub fn apply(&mut self, event: &StreamEvent) -> Result<(), ProviderError> {
        match event {
            StreamEvent::MessageStart { message } => {
                self.id = Some(message.id.clone());
                self.model = message.model.clone();
                self.usage = TokenUsage::from(&message.usage);
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                if *index != self.blocks.len() {
                    return Err(ProviderError::MalformedStream(format!(
                        "content block {index} started, expected {}",
                        self.blocks.len()
                    )));
                }
                self.blocks.push(PartialBlock {
                    block: content_block.clone(),
                    partial_json: String::new(),
                });
            }
            StreamEvent::ContentBlockDelta { index, delta } => {
                let partial = self.block_mut(*index)?;
                match (&mut partial.block, delta) {
                    (ContentBlock::Text { text }, BlockDelta::TextDelta { text: more }) => {
                        text.push_str(more)
                    }
                    (ContentBlock::ToolUse { .. }, BlockDelta::InputJsonDelta { partial_json }) => {
                        partial.partial_json.push_str(partial_json)
                    }
                    (
                        ContentBlock::Thinking { thinking, .. },
                        BlockDelta::ThinkingDelta { thinking: more },
                    ) => thinking.push_str(more),
                    (
                        ContentBlock::Thinking { signature, .. },
                        BlockDelta::SignatureDelta { signature: more },
                    ) => signature.get_or_insert_with(String::new).push_str(more),
                    (_, BlockDelta::Unknown) => {}
                    (block, delta) => {
                        return Err(ProviderError::MalformedStream(format!(
                            "delta {delta:?} does not apply to {block:?}"
                        )))
                    }
                }
            }
            StreamEvent::ContentBlockStop { index } => {
                let partial = self.block_mut(*index)?;
                if let ContentBlock::ToolUse { input, .. } = &mut partial.block {
                    let raw = std::mem::take(&mut partial.partial_json);
                    if !raw.trim().is_empty() {
                        *input = serde_json::from_str(&raw).map_err(|e| {
                            ProviderError::MalformedStream(format!("invalid tool input json: {e}"))
                        })?;
                    } else if input.is_null() {
                        *input = json!({});
                    }
                }
            }
            StreamEvent::MessageDelta { delta, usage } => {
                if let Some(reason) = &delta.stop_reason {
                    self.stop_reason = Some(parse_stop_reason(reason));
                }
                if let Some(usage) = usage {
                    self.usage.output_tokens = usage.output_tokens;
                    if let Some(read) = usage.cache_read_input_tokens {
                        self.usage.cache_read_tokens = read;
                    }
                    if let Some(created) = usage.cache_creation_input_tokens {
                        self.usage.cache_creation_tokens = created;
                    }
                }
            }
            StreamEvent::Error { error } => {
                return Err(api_error_from_stream(&error.error_type, &error.message).into());
            }
            StreamEvent::MessageStop | StreamEvent::Ping | StreamEvent::Unknown => {}
        }
        Ok(())
    }

    pub fn finish(self) -> Result<NativeMessage, ProviderError> {
        let id = self.id.ok_or_else(|| {
            ProviderError::MalformedStream("stream ended before message_start".to_string())
        })?;
        Ok(NativeMessage {
            id,
            model: self.model,
            content: self.blocks.into_iter().map(|p| p.block).collect(),
            stop_reason: self.stop_reason,
            usage: self.usage,
        })
    }
}

type RawEvents = BoxStream<'static, Result<Value, ProviderError>>;
type EventObserver = Box<dyn FnMut(&Value) + Send>;

/// A live native response.
///
/// Every event pulled through [`NativeMessageStream::next_event`] is also
/// folded into an internal accumulator, so [`NativeMessageStream::final_message`]
/// can be called at any point to drain the rest and get the whole message.
pub struct NativeMessageStream {
    events: RawEvents,
    accumulator: MessageAccumulator,
    observer: Option<EventObserver>,
}

impl NativeMessageStream {
    pub fn new(events: RawEvents) -> Self {
        Self {
            events,
            accumulator: MessageAccumulator::new(),
            observer: None,
        }
    }

    /// Replay a complete message as a stream
    pub fn from_message(message: FullMessage) -> Self {
        let events = message.into_events().into_iter().map(Ok);
        Self::new(stream::iter(events).boxed())
    }

    /// Called with each raw event before it is parsed
    pub fn inspect(mut self, observer: impl FnMut(&Value) + Send + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub async fn next_event(&mut self) -> Option<Result<StreamEvent, ProviderError>> {
        let raw = match self.events.next().await? {
            Ok(raw) => raw,
            Err(err) => return Some(Err(err)),
        };
        if let Some(observer) = self.observer.as_mut() {
            observer(&raw);
        }

        let event = match serde_json::from_value::<StreamEvent>(raw) {
            Ok(event) => event,
            Err(err) => {
                return Some(Err(ProviderError::MalformedStream(format!(
                    "unparseable stream event: {err}"
                ))))
            }
        };
        Some(self.accumulator.apply(&event).map(|_| event))
    }

    pub async fn final_message(mut self) -> Result<NativeMessage, ProviderError> {
        while let Some(event) = self.next_event().await {
            event?;
        }
        self.accumulator.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiErrorKind;

    fn raw_stream(events: Vec<Value>) -> NativeMessageStream {
        NativeMessageStream::new(stream::iter(events.into_iter().map(Ok)).boxed())
    }

    fn text_stream() -> Vec<Value> {
        vec![
            json!({"type": "message_start", "message": {"id": "msg_1", "model": "claude-sonnet", "usage": {"input_tokens": 12, "output_tokens": 1, "cache_read_input_tokens": 4}}}),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
            json!({"type": "ping"}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hel"}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "lo"}}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 7}}),
            json!({"type": "message_stop"}),
        ]
    }

    #[tokio::test]
    async fn test_text_message_aggregates() {
        let message = raw_stream(text_stream()).final_message().await.unwrap();
        assert_eq!(message.id, "msg_1");
        assert_eq!(message.content, vec![ContentBlock::text("Hello")]);
        assert_eq!(message.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(message.usage.input_tokens, 12);
        assert_eq!(message.usage.output_tokens, 7);
        assert_eq!(message.usage.cache_read_tokens, 4);
    }

    #[tokio::test]
    async fn test_tool_use_and_thinking() {
        let events = vec![
            json!({"type": "message_start", "message": {"id": "msg_2", "model": "m", "usage": {"input_tokens": 1}}}),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "thinking", "thinking": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "thinking_delta", "thinking": "let me"}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "signature_delta", "signature": "sig"}}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "content_block_start", "index": 1, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "bash", "input": {}}}),
            json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"command\":"}}),
            json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": " \"ls\"}"}}),
            json!({"type": "content_block_stop", "index": 1}),
            json!({"type": "content_block_start", "index": 2, "content_block": {"type": "tool_use", "id": "toolu_2", "name": "noop", "input": {}}}),
            json!({"type": "content_block_stop", "index": 2}),
            json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 3}}),
        ];

        let message = raw_stream(events).final_message().await.unwrap();
        assert_eq!(
            message.content[0],
            ContentBlock::Thinking {
                thinking: "let me".to_string(),
                signature: Some("sig".to_string()),
            }
        );
        assert_eq!(
            message.content[1],
            ContentBlock::tool_use("toolu_1", "bash", json!({"command": "ls"}))
        );
        assert_eq!(message.content[2], ContentBlock::tool_use("toolu_2", "noop", json!({})));
        assert_eq!(message.stop_reason, Some(StopReason::ToolUse));
    }

    #[tokio::test]
    async fn test_error_event_becomes_api_error() {
        let events = vec![
            json!({"type": "message_start", "message": {"id": "msg_3", "model": "m"}}),
            json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
        ];
        let err = raw_stream(events).final_message().await.unwrap_err();
        let api = err.as_api_error().unwrap();
        assert_eq!(api.kind, ApiErrorKind::Overloaded);
    }

    #[tokio::test]
    async fn test_missing_message_start_is_malformed() {
        let err = raw_stream(vec![json!({"type": "message_stop"})])
            .final_message()
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::MalformedStream(_)));
    }

    #[tokio::test]
    async fn test_out_of_order_block_is_malformed() {
        let events = vec![
            json!({"type": "message_start", "message": {"id": "m", "model": "m"}}),
            json!({"type": "content_block_start", "index": 1, "content_block": {"type": "text", "text": ""}}),
        ];
        let err = raw_stream(events).final_message().await.unwrap_err();
        assert!(matches!(err, ProviderError::MalformedStream(_)));
    }

    #[tokio::test]
    async fn test_unknown_events_are_ignored() {
        let mut events = text_stream();
        events.insert(1, json!({"type": "some_future_event", "payload": 1}));
        let message = raw_stream(events).final_message().await.unwrap();
        assert_eq!(message.content, vec![ContentBlock::text("Hello")]);
    }

    #[tokio::test]
    async fn test_full_message_replay_matches_stream() {
        let full: FullMessage = serde_json::from_value(json!({
            "id": "msg_b",
            "type": "message",
            "role": "assistant",
            "model": "anthropic.claude",
            "content": [
                {"type": "text", "text": "Hello"},
                {"type": "tool_use", "id": "toolu_9", "name": "read", "input": {"path": "a"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 5, "output_tokens": 9}
        }))
        .unwrap();

        let mut seen = Vec::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let stream = NativeMessageStream::from_message(full).inspect(move |raw| {
            let _ = tx.send(raw["type"].as_str().unwrap_or_default().to_string());
        });
        let message = stream.final_message().await.unwrap();
        while let Ok(kind) = rx.try_recv() {
            seen.push(kind);
        }

        assert_eq!(seen.first().map(String::as_str), Some("message_start"));
        assert_eq!(seen.last().map(String::as_str), Some("message_stop"));
        assert_eq!(message.content.len(), 2);
        assert_eq!(message.content[1], ContentBlock::tool_use("toolu_9", "read", json!({"path": "a"})));
        assert_eq!(message.usage.input_tokens, 5);
        assert_eq!(message.usage.output_tokens, 9);
        assert_eq!(message.stop_reason, Some(StopReason::ToolUse));
    }
}
