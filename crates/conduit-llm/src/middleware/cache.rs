use async_trait::async_trait;
use conduit_config::CacheConfig;
use conduit_ir::{ChatParameters, ChatRequest, ChatResponse, Message, ResponseMetadata, ToolChoice, ToolDefinition};
use mini_moka::sync::Cache;
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::{Middleware, Next};
use crate::error::LlmError;

/// In-memory response cache for deterministic requests
///
/// Keyed by a SHA-256 of the fields that determine the answer. Streams always
/// bypass the cache.
pub struct CacheMiddleware {
    cache: Cache<String, ChatResponse>,
}

impl CacheMiddleware {
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.capacity)
            .time_to_live(config.ttl)
            .build();

        Self { cache }
    }

    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Request fields that determine a response; metadata and `stream` excluded
#[derive(Serialize)]
struct CacheKey<'a> {
    messages: &'a [Message],
    parameters: &'a ChatParameters,
    tools: Option<&'a [ToolDefinition]>,
    tool_choice: Option<&'a ToolChoice>,
}

fn cache_key(request: &ChatRequest) -> Result<String, LlmError> {
    let key = CacheKey {
        messages: &request.messages,
        parameters: &request.parameters,
        tools: request.tools.as_deref(),
        tool_choice: request.tool_choice.as_ref(),
    };
    let json = serde_json::to_vec(&key).map_err(|e| anyhow::anyhow!("failed to serialize cache key: {e}"))?;

    Ok(format!("{:x}", Sha256::digest(&json)))
}

#[async_trait]
impl Middleware for CacheMiddleware {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn handle(&self, request: &ChatRequest, next: Next<'_>) -> Result<ChatResponse, LlmError> {
        if !request.is_deterministic() {
            return next.run(request).await;
        }

        let key = cache_key(request)?;

        if let Some(mut cached) = self.cache.get(&key) {
            tracing::debug!(request_id = %request.request_id(), cache_key = %key, "cache hit");

            // Answer this request, not the one that filled the entry
            let served_by = cached.metadata.provenance.backend.take();
            let model = cached.metadata.model.take();
            cached.metadata = ResponseMetadata::for_request(&request.metadata);
            cached.metadata.provenance.backend = served_by;
            cached.metadata.model = model;
            return Ok(cached);
        }

        tracing::debug!(request_id = %request.request_id(), cache_key = %key, "cache miss");

        let response = next.run(request).await?;
        self.cache.insert(key, response.clone());
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::testing::ScriptedBackend;

    fn chain() -> Vec<Arc<dyn Middleware>> {
        vec![Arc::new(CacheMiddleware::new(&CacheConfig {
            capacity: 10,
            ttl: Duration::from_secs(60),
        }))]
    }

    fn request(text: &str) -> ChatRequest {
        ChatRequest::new("m", vec![Message::user(text)])
    }

    #[tokio::test]
    async fn deterministic_requests_are_served_from_cache() {
        let chain = chain();
        let backend = ScriptedBackend::replying("b", "OK");

        let first_request = request("hi");
        let second_request = request("hi");
        let first = Next::new(&chain, &backend).run(&first_request).await.unwrap();
        let second = Next::new(&chain, &backend).run(&second_request).await.unwrap();

        assert_eq!(backend.calls(), 1);
        assert_eq!(first.text(), second.text());
        assert_eq!(second.metadata.request_id, second_request.metadata.request_id);
        assert_eq!(second.metadata.provenance.backend.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn different_messages_miss() {
        let chain = chain();
        let backend = ScriptedBackend::replying("b", "OK");

        Next::new(&chain, &backend).run(&request("hi")).await.unwrap();
        Next::new(&chain, &backend).run(&request("bye")).await.unwrap();

        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn sampled_requests_bypass() {
        let chain = chain();
        let backend = ScriptedBackend::replying("b", "OK");

        let mut sampled = request("hi");
        sampled.parameters.temperature = Some(0.7);
        Next::new(&chain, &backend).run(&sampled).await.unwrap();
        Next::new(&chain, &backend).run(&sampled).await.unwrap();

        assert_eq!(backend.calls(), 2);
    }

    #[test]
    fn key_ignores_request_identity() {
        assert_eq!(cache_key(&request("hi")).unwrap(), cache_key(&request("hi")).unwrap());
        assert_ne!(cache_key(&request("hi")).unwrap(), cache_key(&request("bye")).unwrap());
    }
}
