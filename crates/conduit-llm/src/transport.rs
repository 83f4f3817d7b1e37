//! HTTP transport injected into every backend

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::LlmError;

/// Response body as a stream of network reads
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, LlmError>> + Send>>;

/// Outgoing provider call
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Upper bound on waiting for the response head
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            timeout: None,
        }
    }

    /// POST with a JSON body
    pub fn post_json<T: Serialize>(url: Url, body: &T) -> Result<Self, LlmError> {
        let body = serde_json::to_vec(body).map_err(|e| anyhow::anyhow!("failed to serialize request body: {e}"))?;

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(Self {
            method: Method::POST,
            url,
            headers,
            body: Bytes::from(body),
            timeout: None,
        })
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Provider response with a lazily read body
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ByteStream,
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl HttpResponse {
    /// Read the whole body
    pub async fn bytes(mut self) -> Result<Bytes, LlmError> {
        let mut buffer = BytesMut::new();
        while let Some(read) = self.body.next().await {
            buffer.extend_from_slice(&read?);
        }
        Ok(buffer.freeze())
    }

    pub async fn text(self) -> Result<String, LlmError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Read and decode a JSON body
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, LlmError> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| LlmError::Provider {
            status: StatusCode::BAD_GATEWAY.as_u16(),
            body: format!("failed to parse response: {e}"),
        })
    }

    /// Turn a non-success response into a classified error carrying its body
    pub async fn error_for_status(self) -> Result<Self, LlmError> {
        if self.status.is_success() {
            return Ok(self);
        }

        let status = self.status;
        let headers = self.headers.clone();
        let body = self.text().await.unwrap_or_default();

        Err(LlmError::from_status(status, &headers, body))
    }
}

/// Sends provider calls; swapped for a scripted fake in tests
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LlmError>;
}

/// Production transport over a shared `reqwest` client
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LlmError> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
            timeout,
        } = request;

        tracing::trace!(%method, %url, "sending provider request");

        let pending = self.client.request(method, url).headers(headers).body(body).send();

        let result = match timeout {
            Some(limit) => tokio::time::timeout(limit, pending)
                .await
                .map_err(|_| LlmError::Network(format!("request timed out after {}ms", limit.as_millis())))?,
            None => pending.await,
        };

        let response = result.map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map(|read| read.map_err(|e| LlmError::Network(e.to_string())));

        Ok(HttpResponse {
            status,
            headers,
            body: Box::pin(body),
        })
    }
}
