//! Provider-agnostic intermediate representation for chat requests
//!
//! Every frontend parses into these types and every backend serializes out of
//! them. Nothing here performs I/O.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod accumulator;
pub mod message;
pub mod request;
pub mod response;
pub mod stream;
pub mod tool;

pub use accumulator::{StreamAccumulator, StreamFailure, parse_arguments};
pub use message::{Content, ContentPart, ImageSource, Message, Role};
pub use request::{ChatParameters, ChatRequest, Provenance, RequestMetadata};
pub use response::{ChatResponse, FinishReason, ResponseMetadata, Usage, assistant_message};
pub use stream::{ErrorKind, SequenceViolation, StreamChunk, ToolUseDelta, validate_sequence};
pub use tool::{ToolChoice, ToolDefinition};

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
