//! Anthropic Messages API backend

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use conduit_config::BackendConfig;
use conduit_ir::{ChatRequest, ChatResponse, ErrorKind, ToolUseDelta};
use http::{HeaderMap, HeaderValue};
use tokio_util::sync::CancellationToken;

use super::{Backend, BackendCapabilities, Endpoint};
use crate::convert::anthropic::{response_to_ir, stop_reason};
use crate::error::LlmError;
use crate::protocol::anthropic::{
    AnthropicErrorDetail, AnthropicRequest, AnthropicResponse, AnthropicStreamContentBlock, AnthropicStreamDelta,
    AnthropicStreamEvent,
};
use crate::stream::{ChunkMapper, ChunkStream, Framing, Mapped, normalize};
use crate::transport::{HttpRequest, Transport};

/// Default Anthropic API base URL
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

/// Anthropic API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API
pub struct AnthropicBackend {
    endpoint: Endpoint,
}

impl AnthropicBackend {
    pub fn new(name: &str, config: &BackendConfig, transport: Arc<dyn Transport>) -> Result<Self, LlmError> {
        Ok(Self {
            endpoint: Endpoint::new(name, config, transport, DEFAULT_BASE_URL)?,
        })
    }

    fn auth(&self) -> Result<HeaderMap, LlmError> {
        let key = HeaderValue::from_str(self.endpoint.require_key()?)
            .map_err(|_| LlmError::Validation("API key contains invalid header characters".to_owned()))?;

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", key);
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        Ok(headers)
    }

    fn messages_request(&self, wire: &AnthropicRequest) -> Result<(HttpRequest, HeaderMap), LlmError> {
        let auth = self.auth()?;
        let request = HttpRequest::post_json(self.endpoint.url("messages")?, wire)?;
        Ok((request, auth))
    }
}

#[async_trait]
impl Backend for AnthropicBackend {
    fn name(&self) -> &str {
        self.endpoint.name()
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            streaming: true,
            tool_calling: true,
            vision: true,
        }
    }

    async fn execute(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let mut wire = AnthropicRequest::try_from(request)?;
        wire.stream = None;

        let (http_request, auth) = self.messages_request(&wire)?;
        let response: AnthropicResponse = self.endpoint.send(http_request, auth).await?.json().await?;

        Ok(self.endpoint.stamp(response_to_ir(response, &request.metadata)))
    }

    async fn execute_stream(&self, request: &ChatRequest, cancel: CancellationToken) -> Result<ChunkStream, LlmError> {
        let mut wire = AnthropicRequest::try_from(request)?;
        wire.stream = Some(true);

        let (http_request, auth) = self.messages_request(&wire)?;
        let response = self.endpoint.send(http_request, auth).await?;

        Ok(normalize(
            response.body,
            self.endpoint.stream_context(request, Framing::Sse),
            AnthropicChunkMapper::default(),
            cancel,
        ))
    }

    async fn health_check(&self) -> bool {
        let (Ok(url), Ok(auth)) = (self.endpoint.url("models"), self.auth()) else {
            return false;
        };
        self.endpoint.probe(url, auth).await
    }
}

/// Maps Messages API stream events
///
/// Content block indices count text and tool blocks together; IR tool
/// indices count tool calls only.
#[derive(Default)]
pub(crate) struct AnthropicChunkMapper {
    tool_indices: HashMap<u32, u32>,
}

impl ChunkMapper for AnthropicChunkMapper {
    fn map(&mut self, _event: Option<&str>, payload: serde_json::Value) -> Vec<Mapped> {
        let event: AnthropicStreamEvent = match serde_json::from_value(payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unrecognised event");
                return Vec::new();
            }
        };

        match event {
            AnthropicStreamEvent::MessageStart { message } => message
                .usage
                .map(|usage| Mapped::Usage {
                    prompt: Some(usage.input_tokens),
                    completion: None,
                })
                .into_iter()
                .collect(),
            AnthropicStreamEvent::ContentBlockStart { index, content_block } => match content_block {
                AnthropicStreamContentBlock::Text { text } => vec![Mapped::Content(text)],
                AnthropicStreamContentBlock::ToolUse { id, name, .. } => {
                    let tool_index = u32::try_from(self.tool_indices.len()).unwrap_or(u32::MAX);
                    self.tool_indices.insert(index, tool_index);
                    vec![Mapped::ToolUse(ToolUseDelta {
                        index: tool_index,
                        id: Some(id),
                        name: Some(name),
                        input_delta: String::new(),
                    })]
                }
                AnthropicStreamContentBlock::Unsupported => Vec::new(),
            },
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
                AnthropicStreamDelta::TextDelta { text } => vec![Mapped::Content(text)],
                AnthropicStreamDelta::InputJsonDelta { partial_json } => match self.tool_indices.get(&index) {
                    Some(tool_index) => vec![Mapped::ToolUse(ToolUseDelta {
                        index: *tool_index,
                        id: None,
                        name: None,
                        input_delta: partial_json,
                    })],
                    None => Vec::new(),
                },
                AnthropicStreamDelta::Unsupported => Vec::new(),
            },
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                let mut out = Vec::new();
                if let Some(reason) = delta.stop_reason {
                    out.push(Mapped::Finish(stop_reason(&reason)));
                }
                if let Some(usage) = usage {
                    out.push(Mapped::Usage {
                        prompt: None,
                        completion: Some(usage.output_tokens),
                    });
                }
                out
            }
            AnthropicStreamEvent::MessageStop => vec![Mapped::Terminate],
            AnthropicStreamEvent::Error { error } => vec![stream_error(error)],
            AnthropicStreamEvent::ContentBlockStop { .. } | AnthropicStreamEvent::Ping => Vec::new(),
        }
    }
}

fn stream_error(error: AnthropicErrorDetail) -> Mapped {
    let (kind, status) = match error.error_type.as_str() {
        "rate_limit_error" => (ErrorKind::RateLimit, Some(429)),
        "authentication_error" | "permission_error" => (ErrorKind::Authentication, Some(401)),
        "overloaded_error" => (ErrorKind::Provider, Some(529)),
        "invalid_request_error" => (ErrorKind::Provider, Some(400)),
        _ => (ErrorKind::Provider, Some(500)),
    };

    Mapped::Error {
        kind,
        message: error.message,
        status,
    }
}
