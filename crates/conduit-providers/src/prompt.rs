//! System prompt assembly helpers

use sha2::{Digest, Sha256};

use crate::events::QueryEvent;

const SNIPPET_CHARS: usize = 20;

/// Append one `<context name="…">` block per entry
pub fn format_system_prompt_with_context(
    system_prompt: &[String],
    context: &[(String, String)],
) -> Vec<String> {
    if context.is_empty() {
        return system_prompt.to_vec();
    }

    let mut prompt = system_prompt.to_vec();
    prompt.push(
        "\nAs you answer the user's questions, you can use the following context:\n".to_string(),
    );
    prompt.extend(
        context
            .iter()
            .map(|(key, value)| format!("<context name=\"{key}\">{value}</context>")),
    );
    prompt
}

/// Analytics event identifying a system prompt block without its content
pub fn system_prompt_block_event(block: &str) -> QueryEvent {
    let mut hasher = Sha256::new();
    hasher.update(block.as_bytes());
    QueryEvent::SystemPromptBlock {
        snippet: block.chars().take(SNIPPET_CHARS).collect(),
        length: block.len(),
        hash: hex::encode(hasher.finalize()),
    }
}
