use std::fmt;

use serde::{Deserialize, Serialize};

use crate::response::{FinishReason, Usage};

/// Error categories, shared by errors raised in-process and error chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Authentication,
    RateLimit,
    Network,
    Provider,
    Stream,
    Exhausted,
    Internal,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation_error",
            Self::Authentication => "authentication_error",
            Self::RateLimit => "rate_limit_error",
            Self::Network => "network_error",
            Self::Provider => "provider_error",
            Self::Stream => "stream_error",
            Self::Exhausted => "exhausted_error",
            Self::Internal => "internal_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partial or complete tool call inside a stream
///
/// The first delta for an index carries `id` and `name`; later deltas carry
/// only argument fragments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolUseDelta {
    /// Position of the call within the response
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// JSON fragment of the arguments
    #[serde(default)]
    pub input_delta: String,
}

/// One unit of a streamed response
///
/// A well-formed stream is `Start (Content | ToolUse | Metadata)* (Done | Error)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    /// Always first, exactly once
    Start {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    /// Text fragment
    Content { delta: String },
    ToolUse(ToolUseDelta),
    /// Out-of-band provider information
    Metadata { data: serde_json::Value },
    /// Terminal failure
    Error {
        kind: ErrorKind,
        message: String,
        /// Upstream HTTP status, when the failure came from one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
    },
    /// Terminal success
    Done {
        finish_reason: FinishReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

impl StreamChunk {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    pub fn content(delta: impl Into<String>) -> Self {
        Self::Content { delta: delta.into() }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
            status: None,
        }
    }
}

/// A chunk sequence that breaks the stream grammar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceViolation {
    /// Index of the offending chunk, or the length for a missing terminal
    pub position: usize,
    pub reason: &'static str,
}

impl fmt::Display for SequenceViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk {}: {}", self.position, self.reason)
    }
}

impl std::error::Error for SequenceViolation {}

/// Check a complete chunk sequence against the stream grammar
pub fn validate_sequence(chunks: &[StreamChunk]) -> Result<(), SequenceViolation> {
    let violation = |position, reason| Err(SequenceViolation { position, reason });

    match chunks.first() {
        Some(StreamChunk::Start { .. }) => {}
        Some(_) => return violation(0, "stream must begin with start"),
        None => return violation(0, "stream is empty"),
    }

    let last = chunks.len() - 1;
    for (position, chunk) in chunks.iter().enumerate().skip(1) {
        match chunk {
            StreamChunk::Start { .. } => return violation(position, "duplicate start"),
            StreamChunk::Done { .. } | StreamChunk::Error { .. } if position != last => {
                return violation(position, "chunk after terminal");
            }
            _ => {}
        }
    }

    if last == 0 || !chunks[last].is_terminal() {
        return violation(chunks.len(), "stream has no terminal chunk");
    }

    Ok(())
}
