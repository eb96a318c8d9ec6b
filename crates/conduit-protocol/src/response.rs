//! Normalized provider response

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AssistantMessage, ContentBlock, MessageContent, MessageId, Role, StopReason, TokenUsage};

/// Result of one completed query, whatever backend produced it.
///
/// Failed calls are also represented here, with `is_api_error` set and a
/// single user-facing text block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub id: Uuid,
    pub role: Role,
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<StopReason>,
    pub usage: TokenUsage,
    pub model: String,
    /// Wall-clock duration including retries
    pub duration_ms: u64,
    pub ttft_ms: Option<u64>,
    pub cost_usd: f64,
    #[serde(default)]
    pub is_api_error: bool,
}

impl ProviderResponse {
    /// Synthetic assistant response carrying an error message
    pub fn api_error(message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            content: vec![ContentBlock::text(message)],
            stop_reason: None,
            usage: TokenUsage::default(),
            model: String::new(),
            duration_ms: 0,
            ttft_ms: None,
            cost_usd: 0.0,
            is_api_error: true,
        }
    }

    /// Concatenated text of all text blocks
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn into_message(self) -> AssistantMessage {
        AssistantMessage {
            id: MessageId(self.id.to_string()),
            content: MessageContent::Blocks(self.content),
            is_api_error: self.is_api_error,
        }
    }
}
