use serde::{Deserialize, Serialize};

use crate::message::{ContentPart, Message};
use crate::request::{Provenance, RequestMetadata};

/// Why the model stopped generating
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of generation or a stop sequence
    #[default]
    Stop,
    /// Hit the token limit
    Length,
    /// Model wants a tool to run
    ToolUse,
    /// Output withheld by a safety filter
    ContentFilter,
}

/// Token accounting; `total_tokens` is always the sum of the other two
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub const fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Bookkeeping attached to a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// Id of the request this answers
    pub request_id: String,
    /// Response time in milliseconds since the Unix epoch
    pub timestamp: u64,
    #[serde(default)]
    pub provenance: Provenance,
    /// Model reported by the provider, when it reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ResponseMetadata {
    /// Metadata mirroring a request, stamped now
    pub fn for_request(request: &RequestMetadata) -> Self {
        Self {
            request_id: request.request_id.clone(),
            timestamp: crate::now_millis(),
            provenance: request.provenance.clone(),
            model: None,
        }
    }
}

/// Canonical chat response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// The assistant message
    pub message: Message,
    pub usage: Usage,
    pub finish_reason: FinishReason,
    pub metadata: ResponseMetadata,
}

impl ChatResponse {
    /// Text of the assistant message
    pub fn text(&self) -> String {
        self.message.content.as_text()
    }

    /// Tool calls in the assistant message as `(id, name, input)`
    pub fn tool_calls(&self) -> Vec<(&str, &str, &serde_json::Value)> {
        self.message.content.tool_uses().collect()
    }

    /// Whether the model asked for any tool
    pub fn has_tool_calls(&self) -> bool {
        self.message.content.tool_uses().next().is_some()
    }
}

/// Build the assistant message for a response from text plus tool calls
///
/// Text-only answers stay plain text so that streamed and buffered responses
/// compare equal.
pub fn assistant_message(text: String, tool_calls: Vec<ContentPart>) -> Message {
    if tool_calls.is_empty() {
        return Message::assistant(text);
    }

    let mut parts = Vec::with_capacity(tool_calls.len() + 1);
    if !text.is_empty() {
        parts.push(ContentPart::Text { text });
    }
    parts.extend(tool_calls);

    Message::parts(crate::Role::Assistant, parts)
}
