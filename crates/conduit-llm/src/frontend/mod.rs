//! Frontend adapters: provider-native input and output shapes around the IR
//!
//! A frontend parses what a caller sends into a [`ChatRequest`] and renders
//! IR responses and chunks back into the caller's format. Swapping frontends
//! never changes the IR produced for the same logical request.

pub mod anthropic;
pub mod gemini;
pub mod openai;

use std::sync::atomic::{AtomicU64, Ordering};

use conduit_ir::{ChatRequest, ChatResponse, StreamChunk};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use self::anthropic::AnthropicFrontend;
pub use self::gemini::GeminiFrontend;
pub use self::openai::OpenAiFrontend;
use crate::error::LlmError;

/// Translates one external API shape into and out of the IR
pub trait Frontend: Send + Sync + 'static {
    /// Native request body
    type Request: DeserializeOwned + Send;
    /// Native buffered response
    type Response: Serialize + Send;
    /// Native stream event
    type Chunk: Serialize + Send + 'static;
    /// Per-stream rendering state, created fresh for every stream
    type StreamState: Default + Send + 'static;

    /// Name recorded in request provenance
    fn name(&self) -> &'static str;

    /// Parse a native request
    ///
    /// Fails with a validation error when the model or the messages are
    /// missing.
    fn to_ir(&self, request: Self::Request) -> Result<ChatRequest, LlmError>;

    /// Render a response; usage is copied verbatim
    fn from_ir(&self, response: &ChatResponse) -> Self::Response;

    /// Render one IR chunk as zero or more native events
    ///
    /// Error chunks render nothing; the bridge surfaces them as errors.
    fn render_chunk(&self, state: &mut Self::StreamState, chunk: &StreamChunk) -> Vec<Self::Chunk>;

    /// Frame a native event for a `text/event-stream` body
    fn encode_sse(&self, chunk: &Self::Chunk) -> Result<String, LlmError> {
        Ok(format!("data: {}\n\n", to_json(chunk)?))
    }

    /// Trailer written after the last event, if the format has one
    fn end_of_stream(&self) -> Option<&'static str> {
        None
    }
}

/// Reject requests no backend could serve and record the frontend
pub(crate) fn validated(mut request: ChatRequest, frontend: &str) -> Result<ChatRequest, LlmError> {
    if request.model().trim().is_empty() {
        return Err(LlmError::Validation("model is required".to_owned()));
    }
    // A system prompt on its own is not a conversation
    if request.conversation().next().is_none() {
        return Err(LlmError::Validation("at least one message is required".to_owned()));
    }

    request.metadata.provenance.frontend = Some(frontend.to_owned());
    Ok(request)
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<String, LlmError> {
    serde_json::to_string(value).map_err(|e| anyhow::anyhow!("failed to serialize event: {e}").into())
}

/// Synthetic response ids: a fixed prefix plus a process-unique counter
#[derive(Debug)]
pub(crate) struct IdSequence {
    prefix: &'static str,
    next: AtomicU64,
}

impl IdSequence {
    pub(crate) const fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            next: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_id(&self) -> String {
        format!("{}{}", self.prefix, self.next.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use conduit_ir::Message;

    use super::*;

    #[test]
    fn ids_are_unique_and_prefixed() {
        let ids = IdSequence::new("msg_");
        let first = ids.next_id();
        let second = ids.next_id();
        assert!(first.starts_with("msg_"));
        assert_ne!(first, second);
    }

    #[test]
    fn missing_model_is_rejected() {
        let request = ChatRequest::new(" ", vec![Message::user("hi")]);
        assert!(matches!(validated(request, "openai"), Err(LlmError::Validation(_))));
    }

    #[test]
    fn empty_conversation_is_rejected() {
        let request = ChatRequest::new("m", Vec::new());
        assert!(matches!(validated(request, "openai"), Err(LlmError::Validation(_))));
    }

    #[test]
    fn system_prompt_alone_is_rejected() {
        let request = ChatRequest::new("m", vec![Message::system("be brief")]);
        assert!(matches!(validated(request, "openai"), Err(LlmError::Validation(_))));
    }

    #[test]
    fn frontend_is_recorded() {
        let request = validated(ChatRequest::new("m", vec![Message::user("hi")]), "gemini").unwrap();
        assert_eq!(request.metadata.provenance.frontend.as_deref(), Some("gemini"));
    }
}
