//! Translation between conversation messages and the chat-completions shape

use std::collections::HashMap;

use conduit_protocol::{ContentBlock, ConversationMessage, Role, StopReason, ToolSpec};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::openai::{
    ChatChoice, ChatFunction, ChatFunctionCall, ChatMessage, ChatRole, ChatTool, ChatToolCall,
};

fn chat_role(role: Role) -> ChatRole {
    match role {
        Role::User => ChatRole::User,
        Role::Assistant => ChatRole::Assistant,
    }
}

/// Flatten a conversation into chat messages.
///
/// Each tool result is emitted right after the assistant message carrying
/// its call. Results without a call are dropped; thinking blocks have no
/// chat equivalent.
pub fn to_chat_messages(
    system_prompt: &[String],
    messages: &[ConversationMessage],
) -> Vec<ChatMessage> {
    let mut flat = Vec::new();
    let mut tool_results: HashMap<String, ChatMessage> = HashMap::new();

    for message in messages {
        for block in message.content().to_blocks() {
            match block {
                ContentBlock::Text { text } => {
                    flat.push(ChatMessage::text(chat_role(message.role()), text));
                }
                ContentBlock::ToolUse { id, name, input } => flat.push(ChatMessage {
                    role: ChatRole::Assistant,
                    content: None,
                    tool_calls: vec![ChatToolCall {
                        id,
                        call_type: "function".to_string(),
                        function: ChatFunctionCall {
                            name,
                            arguments: input.to_string(),
                        },
                    }],
                    tool_call_id: None,
                }),
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => {
                    tool_results.insert(
                        tool_use_id.clone(),
                        ChatMessage::tool_result(tool_use_id, content),
                    );
                }
                ContentBlock::Thinking { .. } | ContentBlock::RedactedThinking { .. } => {}
            }
        }
    }

    let mut out: Vec<ChatMessage> = system_prompt
        .iter()
        .map(|text| ChatMessage::text(ChatRole::System, text.clone()))
        .collect();

    for message in flat {
        let results: Vec<ChatMessage> = message
            .tool_calls
            .iter()
            .filter_map(|call| tool_results.remove(&call.id))
            .collect();
        out.push(message);
        out.extend(results);
    }
    out
}

/// Assistant content recovered from one chat-completion choice
#[derive(Debug, Clone, PartialEq)]
pub struct BridgedMessage {
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<StopReason>,
    /// The choice carried no message at all
    pub missing_message: bool,
}

pub fn map_finish_reason(reason: &str) -> StopReason {
    match reason {
        "length" => StopReason::MaxTokens,
        "tool_calls" | "function_call" => StopReason::ToolUse,
        "content_filter" => StopReason::ContentFilter,
        _ => StopReason::EndTurn,
    }
}

fn synthesize_call_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

/// Decompose a choice into tool calls, then reasoning, then text
pub fn from_chat_completion(choice: &ChatChoice) -> BridgedMessage {
    let stop_reason = choice.finish_reason.as_deref().map(map_finish_reason);
    let Some(message) = &choice.message else {
        return BridgedMessage {
            content: Vec::new(),
            stop_reason,
            missing_message: true,
        };
    };

    let mut content = Vec::new();

    for call in message.tool_calls.iter().flatten() {
        let input = serde_json::from_str::<Value>(&call.function.arguments)
            .ok()
            .filter(Value::is_object)
            .unwrap_or_else(|| json!({}));
        let id = if call.id.is_empty() {
            synthesize_call_id()
        } else {
            call.id.clone()
        };
        content.push(ContentBlock::tool_use(id, call.function.name.clone(), input));
    }

    let reasoning = [&message.reasoning, &message.reasoning_content]
        .into_iter()
        .flatten()
        .find(|text| !text.is_empty());
    if let Some(thinking) = reasoning {
        content.push(ContentBlock::Thinking {
            thinking: thinking.clone(),
            signature: None,
        });
    }

    if let Some(text) = message.content.as_ref().filter(|t| !t.is_empty()) {
        content.push(ContentBlock::text(text.clone()));
    }

    BridgedMessage {
        content,
        stop_reason,
        missing_message: false,
    }
}

/// Inverse of [`to_chat_messages`] for non-system messages.
///
/// Consecutive chat messages mapping to the same role merge into one
/// conversation message; tool messages become user `tool_result` blocks.
pub fn chat_messages_to_conversation(chat: &[ChatMessage]) -> Vec<ConversationMessage> {
    let mut grouped: Vec<(Role, Vec<ContentBlock>)> = Vec::new();

    for message in chat {
        let (role, blocks) = match message.role {
            ChatRole::System => continue,
            ChatRole::Tool => (
                Role::User,
                vec![ContentBlock::tool_result(
                    message.tool_call_id.clone().unwrap_or_default(),
                    message.content.clone().unwrap_or_default(),
                )],
            ),
            ChatRole::User => (
                Role::User,
                message
                    .content
                    .iter()
                    .map(|text| ContentBlock::text(text.clone()))
                    .collect(),
            ),
            ChatRole::Assistant => {
                let mut blocks: Vec<ContentBlock> = message
                    .content
                    .iter()
                    .map(|text| ContentBlock::text(text.clone()))
                    .collect();
                blocks.extend(message.tool_calls.iter().map(|call| {
                    let input = serde_json::from_str(&call.function.arguments)
                        .unwrap_or_else(|_| json!({}));
                    ContentBlock::tool_use(call.id.clone(), call.function.name.clone(), input)
                }));
                (Role::Assistant, blocks)
            }
        };

        match grouped.last_mut() {
            Some((last_role, last_blocks)) if *last_role == role => last_blocks.extend(blocks),
            _ => grouped.push((role, blocks)),
        }
    }

    grouped
        .into_iter()
        .map(|(role, blocks)| match role {
            Role::User => ConversationMessage::user(blocks),
            Role::Assistant => ConversationMessage::assistant(blocks),
        })
        .collect()
}

pub fn tools_to_chat_tools(specs: &[ToolSpec]) -> Vec<ChatTool> {
    specs
        .iter()
        .map(|spec| ChatTool {
            tool_type: "function".to_string(),
            function: ChatFunction {
                name: spec.name.clone(),
                description: spec.description.clone(),
                parameters: spec.input_schema.to_value(),
            },
        })
        .collect()
}
