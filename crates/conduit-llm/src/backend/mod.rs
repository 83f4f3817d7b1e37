//! Backend trait and one implementation per provider protocol

pub mod anthropic;
pub mod gemini;
pub mod ollama;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conduit_config::{BackendConfig, BackendType};
use conduit_ir::{ChatRequest, ChatResponse};
use http::{HeaderMap, HeaderName, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use tokio_util::sync::CancellationToken;
use url::Url;

pub use self::anthropic::AnthropicBackend;
pub use self::gemini::GeminiBackend;
pub use self::ollama::OllamaBackend;
pub use self::openai::OpenAiBackend;
use crate::error::LlmError;
use crate::stream::{ChunkStream, Framing, StreamContext};
use crate::transport::{HttpRequest, HttpResponse, Transport};

/// Capabilities advertised by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// Whether the backend supports streaming responses
    pub streaming: bool,
    /// Whether the backend supports tool calling
    pub tool_calling: bool,
    /// Whether the backend accepts image input
    pub vision: bool,
}

/// Executes IR requests against one provider
#[async_trait]
pub trait Backend: Send + Sync {
    /// Name from configuration, used in logs and provenance
    fn name(&self) -> &str;

    fn capabilities(&self) -> BackendCapabilities;

    /// Buffered call
    async fn execute(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError>;

    /// Streaming call
    ///
    /// Fails before returning if the provider rejects the request. Once the
    /// stream is returned, failures arrive as a terminal error chunk.
    async fn execute_stream(&self, request: &ChatRequest, cancel: CancellationToken) -> Result<ChunkStream, LlmError>;

    /// Cheap liveness probe
    async fn health_check(&self) -> bool {
        true
    }

    /// Release held resources; stateless HTTP backends hold none
    async fn destroy(&self) {}
}

/// Closed set of supported providers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    OpenAi,
    Anthropic,
    Gemini,
    Ollama,
}

impl From<BackendType> for BackendKind {
    fn from(backend_type: BackendType) -> Self {
        match backend_type {
            BackendType::Openai => Self::OpenAi,
            BackendType::Anthropic => Self::Anthropic,
            BackendType::Gemini => Self::Gemini,
            BackendType::Ollama => Self::Ollama,
        }
    }
}

/// Construct the backend a configuration entry describes
pub fn build_backend(
    name: &str,
    config: &BackendConfig,
    transport: Arc<dyn Transport>,
) -> Result<Arc<dyn Backend>, LlmError> {
    let backend: Arc<dyn Backend> = match BackendKind::from(config.backend_type) {
        BackendKind::OpenAi => Arc::new(OpenAiBackend::new(name, config, transport)?),
        BackendKind::Anthropic => Arc::new(AnthropicBackend::new(name, config, transport)?),
        BackendKind::Gemini => Arc::new(GeminiBackend::new(name, config, transport)?),
        BackendKind::Ollama => Arc::new(OllamaBackend::new(name, config, transport)?),
    };

    tracing::debug!(backend = %name, kind = ?BackendKind::from(config.backend_type), "backend constructed");

    Ok(backend)
}

/// Connection details shared by every HTTP backend
///
/// Read-only after construction; every call builds a fresh request.
pub(crate) struct Endpoint {
    name: String,
    transport: Arc<dyn Transport>,
    base_url: Url,
    api_key: Option<SecretString>,
    headers: HeaderMap,
    timeout: Option<Duration>,
}

impl Endpoint {
    /// # Panics
    ///
    /// Panics if `default_base_url` is not a valid URL.
    pub(crate) fn new(
        name: &str,
        config: &BackendConfig,
        transport: Arc<dyn Transport>,
        default_base_url: &str,
    ) -> Result<Self, LlmError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| Url::parse(default_base_url).expect("valid default URL"));

        let mut headers = HeaderMap::new();
        for (key, value) in &config.headers {
            let key = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| LlmError::Validation(format!("invalid header name '{key}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| LlmError::Validation(format!("invalid value for header '{key}': {e}")))?;
            headers.insert(key, value);
        }

        Ok(Self {
            name: name.to_owned(),
            transport,
            base_url,
            api_key: config.api_key.clone(),
            headers,
            timeout: config.timeout,
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Append a path below the base URL
    pub(crate) fn url(&self, path: &str) -> Result<Url, LlmError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/{path}"))
            .map_err(|e| LlmError::Validation(format!("invalid URL for backend '{}': {e}", self.name)))
    }

    /// Configured key, or a validation error before any network call
    pub(crate) fn require_key(&self) -> Result<&str, LlmError> {
        self.api_key
            .as_ref()
            .map(|key| key.expose_secret())
            .ok_or_else(|| LlmError::Validation(format!("backend '{}' requires an API key", self.name)))
    }

    pub(crate) fn optional_key(&self) -> Option<&str> {
        self.api_key.as_ref().map(ExposeSecret::expose_secret)
    }

    /// Send with configured headers and timeout; non-2xx becomes an error
    pub(crate) async fn send(&self, request: HttpRequest, auth: HeaderMap) -> Result<HttpResponse, LlmError> {
        let request = request
            .with_headers(self.headers.clone())
            .with_headers(auth)
            .with_timeout(self.timeout);

        let response = self.transport.send(request).await.map_err(|e| {
            tracing::error!(backend = %self.name, error = %e, "upstream request failed");
            e
        })?;

        if !response.status.is_success() {
            tracing::warn!(backend = %self.name, status = %response.status, "upstream returned error");
        }

        response.error_for_status().await
    }

    /// Probe a GET endpoint; any 2xx counts as healthy
    pub(crate) async fn probe(&self, url: Url, auth: HeaderMap) -> bool {
        match self.send(HttpRequest::get(url), auth).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(backend = %self.name, error = %e, "health check failed");
                false
            }
        }
    }

    /// Record this backend in the response provenance
    pub(crate) fn stamp(&self, mut response: ChatResponse) -> ChatResponse {
        response.metadata.provenance.backend = Some(self.name.clone());
        response
    }

    pub(crate) fn stream_context(&self, request: &ChatRequest, framing: Framing) -> StreamContext {
        StreamContext {
            framing,
            backend: self.name.clone(),
            request_id: request.request_id().to_owned(),
            model: Some(request.model().to_owned()),
        }
    }
}

/// `Authorization: Bearer <key>`
pub(crate) fn bearer(key: &str) -> Result<HeaderMap, LlmError> {
    let mut headers = HeaderMap::new();
    let value = HeaderValue::from_str(&format!("Bearer {key}"))
        .map_err(|_| LlmError::Validation("API key contains invalid header characters".to_owned()))?;
    headers.insert(http::header::AUTHORIZATION, value);
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;

    #[test]
    fn builds_every_kind() {
        let transport: Arc<dyn Transport> = Arc::new(ScriptedTransport::new());
        for (backend_type, name) in [
            (BackendType::Openai, "oa"),
            (BackendType::Anthropic, "an"),
            (BackendType::Gemini, "ge"),
            (BackendType::Ollama, "ol"),
        ] {
            let config = BackendConfig::new(backend_type).with_api_key("k");
            let backend = build_backend(name, &config, Arc::clone(&transport)).unwrap();
            assert_eq!(backend.name(), name);
            assert!(backend.capabilities().streaming);
        }
    }

    #[test]
    fn url_joins_below_base() {
        let config = BackendConfig::new(BackendType::Openai).with_base_url(Url::parse("http://host/v1/").unwrap());
        let endpoint = Endpoint::new("x", &config, Arc::new(ScriptedTransport::new()), "http://unused").unwrap();
        assert_eq!(endpoint.url("chat/completions").unwrap().as_str(), "http://host/v1/chat/completions");
    }

    #[test]
    fn invalid_static_header_is_rejected() {
        let mut config = BackendConfig::new(BackendType::Openai);
        config.headers.insert("bad header".into(), "x".into());
        let result = Endpoint::new("x", &config, Arc::new(ScriptedTransport::new()), "http://unused");
        assert!(matches!(result, Err(LlmError::Validation(_))));
    }
}
