//! Gemini `generateContent` frontend

use std::collections::BTreeMap;

use conduit_ir::{ChatRequest, ChatResponse, StreamChunk, parse_arguments};

use super::{Frontend, IdSequence, validated};
use crate::convert::gemini::{finish_reason_str, response_from_ir, usage_metadata};
use crate::error::LlmError;
use crate::protocol::gemini::{
    GeminiCandidate, GeminiChatRequest, GeminiContent, GeminiFunctionCall, GeminiPart, GeminiResponse,
};

/// Accepts `generateContent` bodies and renders (partial) responses
#[derive(Debug)]
pub struct GeminiFrontend {
    ids: IdSequence,
}

impl GeminiFrontend {
    pub const fn new() -> Self {
        Self {
            ids: IdSequence::new("resp-"),
        }
    }
}

impl Default for GeminiFrontend {
    fn default() -> Self {
        Self::new()
    }
}

/// Gemini sends function calls whole, so argument fragments are held until
/// the stream finishes
#[derive(Debug, Default)]
pub struct GeminiStreamState {
    id: String,
    model: Option<String>,
    calls: BTreeMap<u32, PendingCall>,
}

#[derive(Debug, Default)]
struct PendingCall {
    name: String,
    arguments: String,
}

impl GeminiStreamState {
    fn partial(&self, parts: Vec<GeminiPart>, finish_reason: Option<String>) -> GeminiResponse {
        GeminiResponse {
            candidates: vec![GeminiCandidate {
                content: GeminiContent {
                    role: Some("model".to_owned()),
                    parts,
                },
                finish_reason,
                index: Some(0),
            }],
            usage_metadata: None,
            model_version: self.model.clone(),
            response_id: Some(self.id.clone()),
        }
    }
}

impl Frontend for GeminiFrontend {
    type Request = GeminiChatRequest;
    type Response = GeminiResponse;
    type Chunk = GeminiResponse;
    type StreamState = GeminiStreamState;

    fn name(&self) -> &'static str {
        "gemini"
    }

    fn to_ir(&self, request: GeminiChatRequest) -> Result<ChatRequest, LlmError> {
        validated(ChatRequest::from(request), self.name())
    }

    fn from_ir(&self, response: &ChatResponse) -> GeminiResponse {
        response_from_ir(response, self.ids.next_id())
    }

    fn render_chunk(&self, state: &mut GeminiStreamState, chunk: &StreamChunk) -> Vec<GeminiResponse> {
        match chunk {
            StreamChunk::Start { model, .. } => {
                state.id = self.ids.next_id();
                state.model.clone_from(model);
                Vec::new()
            }
            StreamChunk::Content { delta } => vec![state.partial(vec![GeminiPart::text(delta.clone())], None)],
            StreamChunk::ToolUse(delta) => {
                let call = state.calls.entry(delta.index).or_default();
                if let Some(name) = &delta.name {
                    call.name.clone_from(name);
                }
                call.arguments.push_str(&delta.input_delta);
                Vec::new()
            }
            StreamChunk::Done { finish_reason, usage } => {
                let parts = std::mem::take(&mut state.calls)
                    .into_values()
                    .map(|call| GeminiPart {
                        function_call: Some(GeminiFunctionCall {
                            name: call.name,
                            args: parse_arguments(&call.arguments),
                        }),
                        ..GeminiPart::default()
                    })
                    .collect();

                let mut last = state.partial(parts, Some(finish_reason_str(*finish_reason).to_owned()));
                last.usage_metadata = usage.map(usage_metadata);
                vec![last]
            }
            StreamChunk::Metadata { .. } | StreamChunk::Error { .. } => Vec::new(),
        }
    }
}
