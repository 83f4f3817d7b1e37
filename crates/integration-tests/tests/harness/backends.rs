//! Real backends pointed at a [`MockProvider`]

use std::sync::Arc;

use conduit_config::{BackendConfig, BackendType};
use conduit_ir::{ChatRequest, Message};
use conduit_llm::{Backend, ReqwestTransport, build_backend};
use url::Url;

use super::mock_provider::MockProvider;

pub const ALL_TYPES: [BackendType; 4] = [
    BackendType::Openai,
    BackendType::Anthropic,
    BackendType::Gemini,
    BackendType::Ollama,
];

/// Base URL the given backend type expects, on the mock's port
pub fn base_url(mock: &MockProvider, backend_type: BackendType) -> Url {
    let prefix = match backend_type {
        BackendType::Openai | BackendType::Anthropic => "/v1",
        BackendType::Gemini => "/v1beta",
        BackendType::Ollama => "",
    };
    Url::parse(&format!("{}{prefix}", mock.root())).expect("valid mock URL")
}

pub fn backend(name: &str, backend_type: BackendType, mock: &MockProvider) -> Arc<dyn Backend> {
    let config = BackendConfig::new(backend_type)
        .with_api_key("test-key")
        .with_base_url(base_url(mock, backend_type));

    build_backend(name, &config, Arc::new(ReqwestTransport::new())).expect("backend builds")
}

pub fn say_hello() -> ChatRequest {
    ChatRequest::new(
        "mock-model",
        vec![Message::system("Be brief."), Message::user("Say hello")],
    )
}
