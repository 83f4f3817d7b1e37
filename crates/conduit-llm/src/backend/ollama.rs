//! Ollama backend, streaming newline-delimited JSON

use std::sync::Arc;

use async_trait::async_trait;
use conduit_config::BackendConfig;
use conduit_ir::{ChatRequest, ChatResponse, ContentPart, ErrorKind, FinishReason, ToolUseDelta};
use http::HeaderMap;
use tokio_util::sync::CancellationToken;

use super::{Backend, BackendCapabilities, Endpoint, bearer};
use crate::convert::ollama::{done_reason, response_to_ir, tool_calls_to_ir};
use crate::error::LlmError;
use crate::protocol::ollama::{OllamaRequest, OllamaResponse};
use crate::stream::{ChunkMapper, ChunkStream, Framing, Mapped, normalize};
use crate::transport::{HttpRequest, HttpResponse, Transport};

/// Default local Ollama URL
const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Ollama `/api/chat`
pub struct OllamaBackend {
    endpoint: Endpoint,
}

impl OllamaBackend {
    pub fn new(name: &str, config: &BackendConfig, transport: Arc<dyn Transport>) -> Result<Self, LlmError> {
        Ok(Self {
            endpoint: Endpoint::new(name, config, transport, DEFAULT_BASE_URL)?,
        })
    }

    /// Keys are optional; a proxy in front of Ollama may want one
    fn auth(&self) -> Result<HeaderMap, LlmError> {
        self.endpoint.optional_key().map_or_else(|| Ok(HeaderMap::new()), bearer)
    }

    async fn chat(&self, request: &ChatRequest, stream: bool) -> Result<HttpResponse, LlmError> {
        let mut wire = OllamaRequest::from(request);
        wire.stream = stream;

        let http_request = HttpRequest::post_json(self.endpoint.url("api/chat")?, &wire)?;
        self.endpoint.send(http_request, self.auth()?).await
    }
}

#[async_trait]
impl Backend for OllamaBackend {
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
        let response: OllamaResponse = self.chat(request, false).await?.json().await?;
        Ok(self.endpoint.stamp(response_to_ir(response, &request.metadata)))
    }

    async fn execute_stream(&self, request: &ChatRequest, cancel: CancellationToken) -> Result<ChunkStream, LlmError> {
        let response = self.chat(request, true).await?;

        Ok(normalize(
            response.body,
            self.endpoint.stream_context(request, Framing::Ndjson),
            OllamaChunkMapper::default(),
            cancel,
        ))
    }

    async fn health_check(&self) -> bool {
        let (Ok(url), Ok(auth)) = (self.endpoint.url("api/tags"), self.auth()) else {
            return false;
        };
        self.endpoint.probe(url, auth).await
    }
}

/// Maps one NDJSON line; the line with `done: true` ends the stream
#[derive(Default)]
pub(crate) struct OllamaChunkMapper {
    tools: usize,
}

impl ChunkMapper for OllamaChunkMapper {
    fn map(&mut self, _event: Option<&str>, payload: serde_json::Value) -> Vec<Mapped> {
        let line: OllamaResponse = match serde_json::from_value(payload) {
            Ok(line) => line,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unrecognised line");
                return Vec::new();
            }
        };

        if let Some(message) = line.error {
            return vec![Mapped::Error {
                kind: ErrorKind::Provider,
                message,
                status: None,
            }];
        }

        let mut out = Vec::new();

        if let Some(message) = line.message {
            out.push(Mapped::Content(message.content));

            let calls = tool_calls_to_ir(message.tool_calls.unwrap_or_default(), self.tools);
            for call in calls {
                if let ContentPart::ToolUse { id, name, input } = call {
                    out.push(Mapped::ToolUse(ToolUseDelta {
                        index: u32::try_from(self.tools).unwrap_or(u32::MAX),
                        id: Some(id),
                        name: Some(name),
                        input_delta: input.to_string(),
                    }));
                    self.tools += 1;
                }
            }
        }

        if line.done {
            let reason = match line.done_reason.as_deref().map_or(FinishReason::Stop, done_reason) {
                FinishReason::Stop if self.tools > 0 => FinishReason::ToolUse,
                other => other,
            };
            out.push(Mapped::Finish(reason));
            out.push(Mapped::Usage {
                prompt: line.prompt_eval_count,
                completion: line.eval_count,
            });
            out.push(Mapped::Terminate);
        }

        out
    }
}
