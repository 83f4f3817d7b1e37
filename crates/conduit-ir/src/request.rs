use serde::{Deserialize, Serialize};

use crate::message::{Message, Role};
use crate::tool::{ToolChoice, ToolDefinition};

/// Generation parameters shared by every provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatParameters {
    /// Model identifier as understood by the target backend
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Stop sequences
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Which adapters touched a request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
}

/// Per-request bookkeeping, never sent to a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetadata {
    /// Unique per request
    pub request_id: String,
    /// Creation time in milliseconds since the Unix epoch
    pub timestamp: u64,
    #[serde(default)]
    pub provenance: Provenance,
}

impl RequestMetadata {
    pub fn new() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            timestamp: crate::now_millis(),
            provenance: Provenance::default(),
        }
    }
}

impl Default for RequestMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// Canonical chat request
///
/// Once a request enters the middleware chain it is only ever borrowed.
/// Middleware that needs a different request clones and modifies the copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Conversation in order; the last non-system message is the new turn
    pub messages: Vec<Message>,
    pub parameters: ChatParameters,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default)]
    pub metadata: RequestMetadata,
}

impl ChatRequest {
    /// Create a request with fresh metadata
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            messages,
            parameters: ChatParameters {
                model: model.into(),
                ..ChatParameters::default()
            },
            stream: false,
            tools: None,
            tool_choice: None,
            metadata: RequestMetadata::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.parameters.model
    }

    pub fn request_id(&self) -> &str {
        &self.metadata.request_id
    }

    /// All system messages joined with a newline, in conversation order
    pub fn system_prompt(&self) -> Option<String> {
        let prompts: Vec<String> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_text())
            .collect();

        if prompts.is_empty() {
            None
        } else {
            Some(prompts.join("\n"))
        }
    }

    /// Messages that belong in a provider's `messages` array
    pub fn conversation(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role != Role::System)
    }

    /// Name of the tool a `tool_use` id refers to, searching earlier turns
    pub fn tool_name_for(&self, tool_use_id: &str) -> Option<&str> {
        self.messages
            .iter()
            .flat_map(|m| m.content.tool_uses())
            .find(|(id, _, _)| *id == tool_use_id)
            .map(|(_, name, _)| name)
    }

    /// Whether sampling is deterministic enough for a response to be reused
    pub fn is_deterministic(&self) -> bool {
        self.parameters.temperature.is_none_or(|t| t.abs() < f64::EPSILON)
    }
}
