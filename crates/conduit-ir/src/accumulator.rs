use std::collections::BTreeMap;
use std::fmt;

use crate::message::ContentPart;
use crate::request::RequestMetadata;
use crate::response::{ChatResponse, FinishReason, ResponseMetadata, Usage, assistant_message};
use crate::stream::{ErrorKind, StreamChunk};

/// A stream that ended in an error chunk, or never ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFailure {
    pub kind: ErrorKind,
    pub message: String,
    pub status: Option<u16>,
}

impl fmt::Display for StreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for StreamFailure {}

#[derive(Debug, Default)]
struct PendingTool {
    id: String,
    name: String,
    arguments: String,
}

/// Folds a chunk sequence into the equivalent buffered response
#[derive(Debug)]
pub struct StreamAccumulator {
    metadata: ResponseMetadata,
    text: String,
    tools: BTreeMap<u32, PendingTool>,
    outcome: Option<Result<(FinishReason, Option<Usage>), StreamFailure>>,
}

impl StreamAccumulator {
    pub fn new(request: &RequestMetadata) -> Self {
        Self {
            metadata: ResponseMetadata::for_request(request),
            text: String::new(),
            tools: BTreeMap::new(),
            outcome: None,
        }
    }

    /// Text received so far
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn push(&mut self, chunk: &StreamChunk) {
        if self.outcome.is_some() {
            return;
        }

        match chunk {
            StreamChunk::Start { model, .. } => {
                if model.is_some() {
                    self.metadata.model.clone_from(model);
                }
            }
            StreamChunk::Content { delta } => self.text.push_str(delta),
            StreamChunk::ToolUse(delta) => {
                let tool = self.tools.entry(delta.index).or_default();
                if let Some(id) = &delta.id {
                    tool.id.clone_from(id);
                }
                if let Some(name) = &delta.name {
                    tool.name.clone_from(name);
                }
                tool.arguments.push_str(&delta.input_delta);
            }
            StreamChunk::Metadata { .. } => {}
            StreamChunk::Error { kind, message, status } => {
                self.outcome = Some(Err(StreamFailure {
                    kind: *kind,
                    message: message.clone(),
                    status: *status,
                }));
            }
            StreamChunk::Done { finish_reason, usage } => {
                self.outcome = Some(Ok((*finish_reason, *usage)));
            }
        }
    }

    /// Finish folding; fails if the stream ended in an error or never ended
    pub fn finish(self) -> Result<ChatResponse, StreamFailure> {
        let (finish_reason, usage) = match self.outcome {
            Some(Ok(outcome)) => outcome,
            Some(Err(failure)) => return Err(failure),
            None => {
                return Err(StreamFailure {
                    kind: ErrorKind::Stream,
                    message: "stream ended without a terminal chunk".to_owned(),
                    status: None,
                });
            }
        };

        let tool_calls = self
            .tools
            .into_values()
            .map(|tool| ContentPart::ToolUse {
                id: tool.id,
                name: tool.name,
                input: parse_arguments(&tool.arguments),
            })
            .collect();

        Ok(ChatResponse {
            message: assistant_message(self.text, tool_calls),
            usage: usage.unwrap_or_default(),
            finish_reason,
            metadata: self.metadata,
        })
    }
}

/// Parse accumulated tool arguments, keeping unparseable text as a string
pub fn parse_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_owned()))
}
