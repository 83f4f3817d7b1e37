//! Anthropic Messages frontend

use std::collections::HashMap;

use conduit_ir::{ChatRequest, ChatResponse, StreamChunk};

use super::{Frontend, IdSequence, to_json, validated};
use crate::convert::anthropic::{response_from_ir, stop_reason_str};
use crate::error::LlmError;
use crate::protocol::anthropic::{
    AnthropicMessageDelta, AnthropicRequest, AnthropicResponse, AnthropicStreamContentBlock, AnthropicStreamDelta,
    AnthropicStreamEvent, AnthropicStreamMessage, AnthropicUsage,
};

/// Accepts Messages API requests and renders message events
#[derive(Debug)]
pub struct AnthropicFrontend {
    ids: IdSequence,
}

impl AnthropicFrontend {
    pub const fn new() -> Self {
        Self {
            ids: IdSequence::new("msg_"),
        }
    }
}

impl Default for AnthropicFrontend {
    fn default() -> Self {
        Self::new()
    }
}

/// Content block bookkeeping for one stream
///
/// Anthropic streams open and close one block at a time, so switching between
/// text and tool calls closes the current block first.
#[derive(Debug, Default)]
pub struct AnthropicStreamState {
    open: Option<OpenBlock>,
    next_block: u32,
    /// IR tool index to content block index
    tool_blocks: HashMap<u32, u32>,
}

#[derive(Debug, Clone, Copy)]
struct OpenBlock {
    index: u32,
    text: bool,
}

impl AnthropicStreamState {
    fn close(&mut self, out: &mut Vec<AnthropicStreamEvent>) {
        if let Some(block) = self.open.take() {
            out.push(AnthropicStreamEvent::ContentBlockStop { index: block.index });
        }
    }

    fn open(&mut self, content_block: AnthropicStreamContentBlock, out: &mut Vec<AnthropicStreamEvent>) -> u32 {
        self.close(out);

        let index = self.next_block;
        self.next_block += 1;
        self.open = Some(OpenBlock {
            index,
            text: matches!(content_block, AnthropicStreamContentBlock::Text { .. }),
        });
        out.push(AnthropicStreamEvent::ContentBlockStart { index, content_block });
        index
    }

    fn text_block(&mut self, out: &mut Vec<AnthropicStreamEvent>) -> u32 {
        match self.open {
            Some(block) if block.text => block.index,
            _ => self.open(AnthropicStreamContentBlock::Text { text: String::new() }, out),
        }
    }
}

impl Frontend for AnthropicFrontend {
    type Request = AnthropicRequest;
    type Response = AnthropicResponse;
    type Chunk = AnthropicStreamEvent;
    type StreamState = AnthropicStreamState;

    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn to_ir(&self, request: AnthropicRequest) -> Result<ChatRequest, LlmError> {
        validated(ChatRequest::from(request), self.name())
    }

    fn from_ir(&self, response: &ChatResponse) -> AnthropicResponse {
        response_from_ir(response, self.ids.next_id())
    }

    fn render_chunk(&self, state: &mut AnthropicStreamState, chunk: &StreamChunk) -> Vec<AnthropicStreamEvent> {
        let mut out = Vec::new();

        match chunk {
            StreamChunk::Start { model, .. } => out.push(AnthropicStreamEvent::MessageStart {
                message: AnthropicStreamMessage {
                    id: self.ids.next_id(),
                    message_type: "message".to_owned(),
                    role: "assistant".to_owned(),
                    model: model.clone().unwrap_or_default(),
                    content: Vec::new(),
                    stop_reason: None,
                    usage: Some(AnthropicUsage::default()),
                },
            }),
            StreamChunk::Content { delta } => {
                let index = state.text_block(&mut out);
                out.push(AnthropicStreamEvent::ContentBlockDelta {
                    index,
                    delta: AnthropicStreamDelta::TextDelta { text: delta.clone() },
                });
            }
            StreamChunk::ToolUse(delta) => {
                if let Some(id) = &delta.id {
                    let index = state.open(
                        AnthropicStreamContentBlock::ToolUse {
                            id: id.clone(),
                            name: delta.name.clone().unwrap_or_default(),
                            input: serde_json::json!({}),
                        },
                        &mut out,
                    );
                    state.tool_blocks.insert(delta.index, index);
                }
                if !delta.input_delta.is_empty()
                    && let Some(index) = state.tool_blocks.get(&delta.index)
                {
                    out.push(AnthropicStreamEvent::ContentBlockDelta {
                        index: *index,
                        delta: AnthropicStreamDelta::InputJsonDelta {
                            partial_json: delta.input_delta.clone(),
                        },
                    });
                }
            }
            StreamChunk::Done { finish_reason, usage } => {
                state.close(&mut out);
                out.push(AnthropicStreamEvent::MessageDelta {
                    delta: AnthropicMessageDelta {
                        stop_reason: Some(stop_reason_str(*finish_reason).to_owned()),
                        stop_sequence: None,
                    },
                    usage: usage.map(|usage| AnthropicUsage {
                        input_tokens: usage.prompt_tokens,
                        output_tokens: usage.completion_tokens,
                    }),
                });
                out.push(AnthropicStreamEvent::MessageStop);
            }
            StreamChunk::Metadata { .. } | StreamChunk::Error { .. } => {}
        }

        out
    }

    fn encode_sse(&self, chunk: &AnthropicStreamEvent) -> Result<String, LlmError> {
        Ok(format!("event: {}\ndata: {}\n\n", event_name(chunk), to_json(chunk)?))
    }
}

/// SSE event name for a stream event
const fn event_name(event: &AnthropicStreamEvent) -> &'static str {
    match event {
        AnthropicStreamEvent::MessageStart { .. } => "message_start",
        AnthropicStreamEvent::ContentBlockStart { .. } => "content_block_start",
        AnthropicStreamEvent::ContentBlockDelta { .. } => "content_block_delta",
        AnthropicStreamEvent::ContentBlockStop { .. } => "content_block_stop",
        AnthropicStreamEvent::MessageDelta { .. } => "message_delta",
        AnthropicStreamEvent::MessageStop => "message_stop",
        AnthropicStreamEvent::Ping => "ping",
        AnthropicStreamEvent::Error { .. } => "error",
    }
}
