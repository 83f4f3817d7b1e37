//! OpenAI-compatible backend

use std::sync::Arc;

use async_trait::async_trait;
use conduit_config::BackendConfig;
use conduit_ir::{ChatRequest, ChatResponse, ErrorKind, ToolUseDelta};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{Backend, BackendCapabilities, Endpoint, bearer};
use crate::convert::openai::{finish_reason, response_to_ir};
use crate::error::LlmError;
use crate::protocol::openai::{OpenAiErrorResponse, OpenAiRequest, OpenAiResponse, OpenAiStreamChunk, OpenAiStreamOptions};
use crate::stream::{ChunkMapper, ChunkStream, Framing, Mapped, normalize};
use crate::transport::{HttpRequest, Transport};

/// Default `OpenAI` API base URL
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Whether the backend is the canonical `OpenAI` API rather than a compatible server
fn is_canonical_openai(base_url: &Url) -> bool {
    base_url.host_str().is_some_and(|h| h == "api.openai.com")
}

/// `OpenAI` chat completions and compatible servers
pub struct OpenAiBackend {
    endpoint: Endpoint,
}

impl OpenAiBackend {
    pub fn new(name: &str, config: &BackendConfig, transport: Arc<dyn Transport>) -> Result<Self, LlmError> {
        Ok(Self {
            endpoint: Endpoint::new(name, config, transport, DEFAULT_BASE_URL)?,
        })
    }

    fn completion_request(&self, wire: &OpenAiRequest) -> Result<(HttpRequest, http::HeaderMap), LlmError> {
        let auth = bearer(self.endpoint.require_key()?)?;
        let request = HttpRequest::post_json(self.endpoint.url("chat/completions")?, wire)?;
        Ok((request, auth))
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
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
        let mut wire = OpenAiRequest::from(request);
        wire.stream = None;

        let (http_request, auth) = self.completion_request(&wire)?;
        let response: OpenAiResponse = self.endpoint.send(http_request, auth).await?.json().await?;

        Ok(self.endpoint.stamp(response_to_ir(response, &request.metadata)))
    }

    async fn execute_stream(&self, request: &ChatRequest, cancel: CancellationToken) -> Result<ChunkStream, LlmError> {
        let mut wire = OpenAiRequest::from(request);
        wire.stream = Some(true);

        // Only the canonical API is known to accept stream_options; many
        // compatible servers reject unknown parameters
        wire.stream_options = is_canonical_openai(self.endpoint.base_url())
            .then_some(OpenAiStreamOptions { include_usage: true });

        let (http_request, auth) = self.completion_request(&wire)?;
        let response = self.endpoint.send(http_request, auth).await?;

        Ok(normalize(
            response.body,
            self.endpoint.stream_context(request, Framing::Sse),
            OpenAiChunkMapper,
            cancel,
        ))
    }

    async fn health_check(&self) -> bool {
        let Ok(key) = self.endpoint.require_key() else {
            return false;
        };
        let (Ok(url), Ok(auth)) = (self.endpoint.url("models"), bearer(key)) else {
            return false;
        };
        self.endpoint.probe(url, auth).await
    }
}

/// Maps `chat.completion.chunk` payloads
pub(crate) struct OpenAiChunkMapper;

impl ChunkMapper for OpenAiChunkMapper {
    fn map(&mut self, _event: Option<&str>, payload: serde_json::Value) -> Vec<Mapped> {
        if payload.get("error").is_some() {
            let message = serde_json::from_value::<OpenAiErrorResponse>(payload)
                .map_or_else(|_| "unknown provider error".to_owned(), |e| e.error.message);
            return vec![Mapped::Error {
                kind: ErrorKind::Provider,
                message,
                status: None,
            }];
        }

        let chunk: OpenAiStreamChunk = match serde_json::from_value(payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unrecognised chunk");
                return Vec::new();
            }
        };

        let mut out = Vec::new();

        // Only the first choice is represented in IR
        if let Some(choice) = chunk.choices.into_iter().find(|choice| choice.index == 0) {
            if let Some(content) = choice.delta.content {
                out.push(Mapped::Content(content));
            }
            for call in choice.delta.tool_calls.unwrap_or_default() {
                let function = call.function.unwrap_or_default();
                out.push(Mapped::ToolUse(ToolUseDelta {
                    index: call.index,
                    id: call.id,
                    name: function.name,
                    input_delta: function.arguments.unwrap_or_default(),
                }));
            }
            if let Some(reason) = choice.finish_reason {
                out.push(Mapped::Finish(finish_reason(&reason)));
            }
        }

        if let Some(usage) = chunk.usage {
            out.push(Mapped::Usage {
                prompt: Some(usage.prompt_tokens),
                completion: Some(usage.completion_tokens),
            });
        }

        out
    }
}
