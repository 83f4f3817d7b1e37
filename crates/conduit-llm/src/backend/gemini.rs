//! Google Gemini backend

use std::sync::Arc;

use async_trait::async_trait;
use conduit_config::BackendConfig;
use conduit_ir::{ChatRequest, ChatResponse, ErrorKind, FinishReason, ToolUseDelta};
use http::HeaderMap;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{Backend, BackendCapabilities, Endpoint};
use crate::convert::call_id;
use crate::convert::gemini::{finish_reason, response_to_ir};
use crate::error::LlmError;
use crate::protocol::gemini::{GeminiErrorResponse, GeminiRequest, GeminiResponse};
use crate::stream::{ChunkMapper, ChunkStream, Framing, Mapped, normalize};
use crate::transport::{HttpRequest, Transport};

/// Default Gemini API base URL
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini `generateContent`
pub struct GeminiBackend {
    endpoint: Endpoint,
}

impl GeminiBackend {
    pub fn new(name: &str, config: &BackendConfig, transport: Arc<dyn Transport>) -> Result<Self, LlmError> {
        Ok(Self {
            endpoint: Endpoint::new(name, config, transport, DEFAULT_BASE_URL)?,
        })
    }

    /// `models/{model}:{method}` with the key as a query parameter
    fn method_url(&self, model: &str, method: &str, sse: bool) -> Result<Url, LlmError> {
        let key = self.endpoint.require_key()?;
        let model = model.strip_prefix("models/").unwrap_or(model);

        let mut url = self.endpoint.url(&format!("models/{model}:{method}"))?;
        {
            let mut query = url.query_pairs_mut();
            if sse {
                query.append_pair("alt", "sse");
            }
            query.append_pair("key", key);
        }
        Ok(url)
    }
}

#[async_trait]
impl Backend for GeminiBackend {
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
        let url = self.method_url(request.model(), "generateContent", false)?;
        let http_request = HttpRequest::post_json(url, &GeminiRequest::from(request))?;

        let response: GeminiResponse = self
            .endpoint
            .send(http_request, HeaderMap::new())
            .await?
            .json()
            .await?;

        Ok(self.endpoint.stamp(response_to_ir(response, &request.metadata)))
    }

    async fn execute_stream(&self, request: &ChatRequest, cancel: CancellationToken) -> Result<ChunkStream, LlmError> {
        let url = self.method_url(request.model(), "streamGenerateContent", true)?;
        let http_request = HttpRequest::post_json(url, &GeminiRequest::from(request))?;

        let response = self.endpoint.send(http_request, HeaderMap::new()).await?;

        Ok(normalize(
            response.body,
            self.endpoint.stream_context(request, Framing::Sse),
            GeminiChunkMapper::default(),
            cancel,
        ))
    }

    async fn health_check(&self) -> bool {
        let Ok(key) = self.endpoint.require_key() else {
            return false;
        };
        let Ok(mut url) = self.endpoint.url("models") else {
            return false;
        };
        url.query_pairs_mut().append_pair("key", key);
        self.endpoint.probe(url, HeaderMap::new()).await
    }
}

/// Maps partial `generateContent` responses
///
/// Gemini delivers each function call whole, so every call becomes one
/// complete tool delta.
#[derive(Default)]
pub(crate) struct GeminiChunkMapper {
    tools: u32,
}

impl ChunkMapper for GeminiChunkMapper {
    fn map(&mut self, _event: Option<&str>, payload: serde_json::Value) -> Vec<Mapped> {
        if payload.get("error").is_some() {
            return match serde_json::from_value::<GeminiErrorResponse>(payload) {
                Ok(response) => {
                    let kind = match response.error.code {
                        429 => ErrorKind::RateLimit,
                        401 | 403 => ErrorKind::Authentication,
                        _ => ErrorKind::Provider,
                    };
                    vec![Mapped::Error {
                        kind,
                        message: response.error.message,
                        status: Some(response.error.code),
                    }]
                }
                Err(_) => vec![Mapped::Error {
                    kind: ErrorKind::Provider,
                    message: "unknown provider error".to_owned(),
                    status: None,
                }],
            };
        }

        let response: GeminiResponse = match serde_json::from_value(payload) {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unrecognised chunk");
                return Vec::new();
            }
        };

        let mut out = Vec::new();

        if let Some(candidate) = response.candidates.into_iter().next() {
            for part in candidate.content.parts {
                if let Some(text) = part.answer_text() {
                    out.push(Mapped::Content(text.to_owned()));
                }
                if let Some(call) = part.function_call {
                    let index = self.tools;
                    self.tools += 1;
                    out.push(Mapped::ToolUse(ToolUseDelta {
                        index,
                        id: Some(call_id(index as usize, &call.name)),
                        name: Some(call.name),
                        input_delta: call.args.to_string(),
                    }));
                }
            }
            if let Some(reason) = candidate.finish_reason {
                // Gemini reports STOP even when it called a function
                let reason = match finish_reason(&reason) {
                    FinishReason::Stop if self.tools > 0 => FinishReason::ToolUse,
                    other => other,
                };
                out.push(Mapped::Finish(reason));
            }
        }

        if let Some(usage) = response.usage_metadata {
            out.push(Mapped::Usage {
                prompt: Some(usage.prompt_token_count),
                completion: Some(usage.candidates_token_count),
            });
        }

        out
    }
}
