//! `OpenAI` chat-completions frontend

use conduit_ir::{ChatRequest, ChatResponse, StreamChunk};

use super::{Frontend, IdSequence, validated};
use crate::convert::openai::{finish_reason_str, response_from_ir};
use crate::error::LlmError;
use crate::protocol::openai::{
    OpenAiRequest, OpenAiResponse, OpenAiStreamChoice, OpenAiStreamChunk, OpenAiStreamDelta, OpenAiStreamFunctionCall,
    OpenAiStreamToolCall, OpenAiUsage,
};

/// Accepts chat-completion requests and renders `chat.completion(.chunk)`
#[derive(Debug)]
pub struct OpenAiFrontend {
    ids: IdSequence,
}

impl OpenAiFrontend {
    pub const fn new() -> Self {
        Self {
            ids: IdSequence::new("chatcmpl-"),
        }
    }
}

impl Default for OpenAiFrontend {
    fn default() -> Self {
        Self::new()
    }
}

/// Envelope shared by every chunk of one stream
#[derive(Debug, Default)]
pub struct OpenAiStreamState {
    id: String,
    created: u64,
    model: String,
}

impl OpenAiStreamState {
    fn chunk(&self, delta: OpenAiStreamDelta, finish_reason: Option<String>) -> OpenAiStreamChunk {
        OpenAiStreamChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_owned(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![OpenAiStreamChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage: None,
        }
    }
}

impl Frontend for OpenAiFrontend {
    type Request = OpenAiRequest;
    type Response = OpenAiResponse;
    type Chunk = OpenAiStreamChunk;
    type StreamState = OpenAiStreamState;

    fn name(&self) -> &'static str {
        "openai"
    }

    fn to_ir(&self, request: OpenAiRequest) -> Result<ChatRequest, LlmError> {
        validated(ChatRequest::from(request), self.name())
    }

    fn from_ir(&self, response: &ChatResponse) -> OpenAiResponse {
        response_from_ir(response, self.ids.next_id())
    }

    fn render_chunk(&self, state: &mut OpenAiStreamState, chunk: &StreamChunk) -> Vec<OpenAiStreamChunk> {
        match chunk {
            StreamChunk::Start { model, .. } => {
                state.id = self.ids.next_id();
                state.created = conduit_ir::now_millis() / 1000;
                state.model = model.clone().unwrap_or_default();

                vec![state.chunk(
                    OpenAiStreamDelta {
                        role: Some("assistant".to_owned()),
                        content: Some(String::new()),
                        tool_calls: None,
                    },
                    None,
                )]
            }
            StreamChunk::Content { delta } => vec![state.chunk(
                OpenAiStreamDelta {
                    content: Some(delta.clone()),
                    ..OpenAiStreamDelta::default()
                },
                None,
            )],
            StreamChunk::ToolUse(delta) => vec![state.chunk(
                OpenAiStreamDelta {
                    tool_calls: Some(vec![OpenAiStreamToolCall {
                        index: delta.index,
                        id: delta.id.clone(),
                        tool_type: delta.id.as_ref().map(|_| "function".to_owned()),
                        function: Some(OpenAiStreamFunctionCall {
                            name: delta.name.clone(),
                            arguments: Some(delta.input_delta.clone()),
                        }),
                    }]),
                    ..OpenAiStreamDelta::default()
                },
                None,
            )],
            StreamChunk::Done { finish_reason, usage } => {
                let mut last = state.chunk(
                    OpenAiStreamDelta::default(),
                    Some(finish_reason_str(*finish_reason).to_owned()),
                );
                last.usage = usage.map(|usage| OpenAiUsage {
                    prompt_tokens: usage.prompt_tokens,
                    completion_tokens: usage.completion_tokens,
                    total_tokens: usage.total_tokens,
                });
                vec![last]
            }
            StreamChunk::Metadata { .. } | StreamChunk::Error { .. } => Vec::new(),
        }
    }

    fn end_of_stream(&self) -> Option<&'static str> {
        Some("data: [DONE]\n\n")
    }
}

#[cfg(test)]
mod tests {
    use conduit_ir::{FinishReason, Message, RequestMetadata, ResponseMetadata, ToolUseDelta, Usage, assistant_message};

    use super::*;

    fn response(text: &str) -> ChatResponse {
        ChatResponse {
            message: assistant_message(text.to_owned(), Vec::new()),
            usage: Usage::new(3, 1),
            finish_reason: FinishReason::Stop,
            metadata: ResponseMetadata::for_request(&RequestMetadata::new()),
        }
    }

    #[test]
    fn parses_and_validates() {
        let frontend = OpenAiFrontend::new();
        let wire: OpenAiRequest = serde_json::from_value(serde_json::json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "Say OK"}],
            "max_tokens": 5
        }))
        .unwrap();

        let request = frontend.to_ir(wire).unwrap();
        assert_eq!(request.messages, vec![Message::user("Say OK")]);
        assert_eq!(request.parameters.max_tokens, Some(5));
        assert_eq!(request.metadata.provenance.frontend.as_deref(), Some("openai"));
    }

    #[test]
    fn empty_messages_fail_validation() {
        let wire: OpenAiRequest = serde_json::from_value(serde_json::json!({"model": "gpt-4o", "messages": []})).unwrap();
        assert!(matches!(OpenAiFrontend::new().to_ir(wire), Err(LlmError::Validation(_))));
    }

    #[test]
    fn response_keeps_usage_and_gets_fresh_ids() {
        let frontend = OpenAiFrontend::new();
        let first = frontend.from_ir(&response("OK"));
        let second = frontend.from_ir(&response("OK"));

        assert!(first.id.starts_with("chatcmpl-"));
        assert_ne!(first.id, second.id);
        assert_eq!(first.object, "chat.completion");
        assert_eq!(first.choices[0].message.content.as_deref(), Some("OK"));

        let usage = first.usage.unwrap();
        assert_eq!((usage.prompt_tokens, usage.completion_tokens, usage.total_tokens), (3, 1, 4));
    }

    #[test]
    fn renders_chunk_stream() {
        let frontend = OpenAiFrontend::new();
        let mut state = OpenAiStreamState::default();
        let chunks = [
            StreamChunk::Start {
                request_id: "r".into(),
                model: Some("gpt-4o".into()),
            },
            StreamChunk::content("O"),
            StreamChunk::ToolUse(ToolUseDelta {
                index: 0,
                id: Some("call_1".into()),
                name: Some("weather".into()),
                input_delta: "{}".into(),
            }),
            StreamChunk::Done {
                finish_reason: FinishReason::ToolUse,
                usage: Some(Usage::new(3, 1)),
            },
        ];

        let rendered: Vec<_> = chunks
            .iter()
            .flat_map(|chunk| frontend.render_chunk(&mut state, chunk))
            .collect();

        assert_eq!(rendered.len(), 4);
        assert!(rendered.iter().all(|chunk| chunk.id == rendered[0].id));
        assert_eq!(rendered[0].choices[0].delta.role.as_deref(), Some("assistant"));
        assert_eq!(rendered[1].choices[0].delta.content.as_deref(), Some("O"));

        let call = &rendered[2].choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.tool_type.as_deref(), Some("function"));
        assert_eq!(rendered[3].choices[0].finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(rendered[3].usage.unwrap().total_tokens, 4);

        let frame = frontend.encode_sse(&rendered[1]).unwrap();
        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("\n\n"));
    }
}
