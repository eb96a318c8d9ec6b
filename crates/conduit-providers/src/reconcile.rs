//! Stream reconciliation: folding partial updates into one response

use futures::{Stream, StreamExt};
use serde_json::{Map, Value};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::anthropic::{NativeMessage, NativeMessageStream, StreamEvent};
use crate::error::ProviderError;
use crate::openai::{ChatChoice, ChatCompletion, ChatCompletionMessage, ChatUsage};

/// Merge one `chat.completion.chunk` into the accumulated message.
///
/// Chunks without choices (usage-only trailers) leave the accumulator as is.
pub fn reduce_chunk(acc: Value, chunk: &Value) -> Result<Value, ProviderError> {
    match chunk.pointer("/choices/0/delta") {
        Some(delta) => merge_delta(acc, delta),
        None => Ok(acc),
    }
}

fn merge_delta(acc: Value, delta: &Value) -> Result<Value, ProviderError> {
    let mut acc = match acc {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let Value::Object(delta) = delta else {
        return Ok(Value::Object(acc));
    };

    for (key, value) in delta {
        let slot = acc.entry(key.clone()).or_insert(Value::Null);
        if slot.is_null() {
            *slot = strip_indices(value.clone());
            continue;
        }

        match (slot, value) {
            (Value::String(existing), Value::String(more)) => {
                // role arrives on several chunks with some providers
                if key != "role" {
                    existing.push_str(more);
                }
            }
            (Value::Array(existing), Value::Array(items)) => {
                for item in items {
                    merge_indexed(existing, item)?;
                }
            }
            (slot, Value::Number(_)) if slot.is_number() => *slot = value.clone(),
            (slot, Value::Object(_)) if slot.is_object() => {
                *slot = merge_delta(slot.take(), value)?;
            }
            _ => {}
        }
    }
    Ok(Value::Object(acc))
}

fn strip_indices(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| match item {
                    Value::Object(mut map) => {
                        map.remove("index");
                        Value::Object(map)
                    }
                    other => other,
                })
                .collect(),
        ),
        other => other,
    }
}

fn merge_indexed(existing: &mut Vec<Value>, item: &Value) -> Result<(), ProviderError> {
    let mut fragment = item.clone();
    let index = match &mut fragment {
        Value::Object(map) => map
            .remove("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize),
        _ => None,
    }
    .unwrap_or(existing.len());

    if index > existing.len() {
        return Err(ProviderError::MalformedStream(format!(
            "array element {index} arrived while only {} exist",
            existing.len()
        )));
    }
    if index == existing.len() {
        existing.push(merge_delta(Value::Null, &fragment)?);
    } else {
        let current = existing[index].take();
        existing[index] = merge_delta(current, &fragment)?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledChat {
    pub completion: ChatCompletion,
    pub ttft_ms: Option<u64>,
}

/// Consume a chunk stream into a complete [`ChatCompletion`].
///
/// `dispatched` is when the request was sent; TTFT is measured from it.
/// `on_chunk` sees every raw chunk in arrival order.
pub async fn reconcile_chat_stream<S>(
    mut stream: S,
    dispatched: Instant,
    cancel: &CancellationToken,
    mut on_chunk: impl FnMut(&Value),
) -> Result<ReconciledChat, ProviderError>
where
    S: Stream<Item = Result<Value, ProviderError>> + Unpin,
{
    let mut acc = Value::Object(Map::new());
    let mut id: Option<String> = None;
    let mut model: Option<String> = None;
    let mut usage: Option<ChatUsage> = None;
    let mut finish_reason: Option<String> = None;
    let mut ttft_ms = None;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Aborted),
            next = stream.next() => next,
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk?;
        on_chunk(&chunk);

        let non_empty = |key: &str| {
            chunk
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        if id.is_none() {
            id = non_empty("id");
        }
        if model.is_none() {
            model = non_empty("model");
        }
        if usage.is_none() {
            usage = chunk
                .get("usage")
                .filter(|u| u.is_object())
                .and_then(|u| serde_json::from_value(u.clone()).ok());
        }
        if let Some(reason) = chunk
            .pointer("/choices/0/finish_reason")
            .and_then(Value::as_str)
        {
            finish_reason = Some(reason.to_string());
        }
        if ttft_ms.is_none()
            && chunk
                .pointer("/choices/0/delta/content")
                .and_then(Value::as_str)
                .is_some_and(|content| !content.is_empty())
        {
            ttft_ms = Some(dispatched.elapsed().as_millis() as u64);
        }

        acc = reduce_chunk(acc, &chunk)?;
    }

    let message: ChatCompletionMessage = serde_json::from_value(acc).map_err(|e| {
        ProviderError::MalformedStream(format!("accumulated message has unexpected shape: {e}"))
    })?;

    Ok(ReconciledChat {
        completion: ChatCompletion {
            id: id.unwrap_or_default(),
            model: model.unwrap_or_default(),
            choices: vec![ChatChoice {
                index: 0,
                message: Some(message),
                finish_reason: Some(finish_reason.unwrap_or_else(|| "stop".to_string())),
            }],
            usage,
        },
        ttft_ms,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledNative {
    pub message: NativeMessage,
    pub ttft_ms: Option<u64>,
}

/// Time the `message_start` event from `dispatched`, then let the stream
/// finish the message
pub async fn reconcile_native_stream(
    mut stream: NativeMessageStream,
    dispatched: Instant,
    cancel: &CancellationToken,
) -> Result<ReconciledNative, ProviderError> {
    let mut ttft_ms = None;

    while ttft_ms.is_none() {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Aborted),
            event = stream.next_event() => event,
        };
        match event {
            Some(Ok(StreamEvent::MessageStart { .. })) => {
                ttft_ms = Some(dispatched.elapsed().as_millis() as u64);
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => return Err(err),
            None => break,
        }
    }

    let message = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(ProviderError::Aborted),
        message = stream.final_message() => message?,
    };
    Ok(ReconciledNative { message, ttft_ms })
}
