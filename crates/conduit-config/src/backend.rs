use std::fmt;
use std::time::Duration;

use indexmap::IndexMap;
use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// Configuration for a single backend
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// Wire protocol spoken by the backend
    #[serde(rename = "type")]
    pub backend_type: BackendType,
    /// API key for authentication
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// Base URL override
    #[serde(default)]
    pub base_url: Option<Url>,
    /// Per-call timeout (e.g. "60s")
    #[serde(default, deserialize_with = "crate::duration::deserialize_option")]
    pub timeout: Option<Duration>,
    /// Static headers sent with every request
    #[serde(default)]
    pub headers: IndexMap<String, String>,
}

impl BackendConfig {
    /// Minimal configuration for a backend type
    pub fn new(backend_type: BackendType) -> Self {
        Self {
            backend_type,
            api_key: None,
            base_url: None,
            timeout: None,
            headers: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(key.into()));
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, url: Url) -> Self {
        self.base_url = Some(url);
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Supported backend protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    /// `OpenAI` chat completions and compatible servers
    Openai,
    /// Anthropic Messages API
    Anthropic,
    /// Google Gemini generateContent
    Gemini,
    /// Local Ollama server
    Ollama,
}

impl BackendType {
    /// Whether requests fail validation without an API key
    pub const fn requires_api_key(self) -> bool {
        !matches!(self, Self::Ollama)
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Openai => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Ollama => "ollama",
        })
    }
}
