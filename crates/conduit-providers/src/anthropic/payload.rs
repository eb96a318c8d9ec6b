//! Native Messages API request body

use conduit_protocol::{ContentBlock, ConversationMessage, Role, ToolSpec};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheControl {
    #[serde(rename = "type")]
    pub cache_type: String,
}

impl CacheControl {
    pub fn ephemeral() -> Self {
        Self {
            cache_type: "ephemeral".to_string(),
        }
    }
}

/// A content block as sent on the wire, optionally carrying a cache breakpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireBlock {
    #[serde(flatten)]
    pub block: ContentBlock,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: Vec<WireBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThinkingConfig {
    #[serde(rename = "type")]
    pub thinking_type: String,
    pub budget_tokens: u32,
}

impl ThinkingConfig {
    pub fn enabled(budget_tokens: u32) -> Self {
        Self {
            thinking_type: "enabled".to_string(),
            budget_tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestMetadata {
    pub user_id: String,
}

/// Backend-neutral request; the client adapts it per backend before sending
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub system: Vec<SystemBlock>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RequestMetadata>,
    pub stream: bool,
}

/// Convert conversation messages, placing cache breakpoints on the last
/// block of each of the final two messages when `caching` is set.
///
/// Thinking blocks never carry a breakpoint; a message ending in one is
/// left unmarked.
pub fn to_wire_messages(messages: &[ConversationMessage], caching: bool) -> Vec<WireMessage> {
    let len = messages.len();
    messages
        .iter()
        .enumerate()
        .map(|(index, message)| {
            let mut content: Vec<WireBlock> = message
                .content()
                .to_blocks()
                .into_iter()
                .map(|block| WireBlock {
                    block,
                    cache_control: None,
                })
                .collect();

            if caching && index + 3 > len {
                if let Some(last) = content.last_mut() {
                    if !last.block.is_thinking() {
                        last.cache_control = Some(CacheControl::ephemeral());
                    }
                }
            }

            WireMessage {
                role: message.role(),
                content,
            }
        })
        .collect()
}

pub fn system_blocks(system_prompt: &[String], caching: bool) -> Vec<SystemBlock> {
    system_prompt
        .iter()
        .map(|text| SystemBlock {
            block_type: "text".to_string(),
            text: text.clone(),
            cache_control: caching.then(CacheControl::ephemeral),
        })
        .collect()
}

/// Keep the first block on its own and join the rest, dropping empties
pub fn split_sys_prompt_prefix(system_prompt: &[String]) -> Vec<String> {
    let Some((first, rest)) = system_prompt.split_first() else {
        return Vec::new();
    };
    [first.clone(), rest.join("\n")]
        .into_iter()
        .filter(|block| !block.is_empty())
        .collect()
}
