//! Middleware chain around a backend call
//!
//! Middleware run in registration order on the way in and in reverse order on
//! the way out. Each one receives a [`Next`] cursor over the rest of the chain
//! and decides whether, and how often, to call it.

mod cache;
mod logging;
mod rate_limit;
mod retry;
mod transform;

use std::sync::Arc;

use async_trait::async_trait;
use conduit_config::MiddlewareConfig;
use conduit_ir::{ChatRequest, ChatResponse};
use tokio_util::sync::CancellationToken;

pub use self::cache::CacheMiddleware;
pub use self::logging::LoggingMiddleware;
pub use self::rate_limit::RateLimitMiddleware;
pub use self::retry::RetryMiddleware;
pub use self::transform::TransformMiddleware;
use crate::backend::Backend;
use crate::error::LlmError;
use crate::stream::ChunkStream;

/// Interceptor around the backend call
///
/// Requests are borrowed; a middleware that needs a different request clones
/// it and passes the copy on.
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, request: &ChatRequest, next: Next<'_>) -> Result<ChatResponse, LlmError>;

    /// Streaming leg; passes straight through unless overridden
    async fn handle_stream(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
        next: Next<'_>,
    ) -> Result<ChunkStream, LlmError> {
        next.run_stream(request, cancel).await
    }
}

/// Remaining middleware plus the backend at the end of the chain
#[derive(Clone, Copy)]
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    backend: &'a dyn Backend,
}

impl<'a> Next<'a> {
    pub fn new(chain: &'a [Arc<dyn Middleware>], backend: &'a dyn Backend) -> Self {
        Self { chain, backend }
    }

    /// Name of the backend this chain ends in
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub async fn run(self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        match self.chain.split_first() {
            Some((head, rest)) => head.handle(request, Next::new(rest, self.backend)).await,
            None => self.backend.execute(request).await,
        }
    }

    pub async fn run_stream(self, request: &ChatRequest, cancel: CancellationToken) -> Result<ChunkStream, LlmError> {
        match self.chain.split_first() {
            Some((head, rest)) => head.handle_stream(request, cancel, Next::new(rest, self.backend)).await,
            None => self.backend.execute_stream(request, cancel).await,
        }
    }
}

/// Build the configured chain: logging, rate limit, cache, retry
pub fn from_config(config: &MiddlewareConfig) -> Result<Vec<Arc<dyn Middleware>>, LlmError> {
    let mut chain: Vec<Arc<dyn Middleware>> = Vec::new();

    if config.logging.enabled {
        chain.push(Arc::new(LoggingMiddleware::new()));
    }
    if let Some(rate_limit) = &config.rate_limit {
        chain.push(Arc::new(RateLimitMiddleware::new(rate_limit)?));
    }
    if let Some(cache) = &config.cache {
        chain.push(Arc::new(CacheMiddleware::new(cache)));
    }
    if let Some(retry) = &config.retry {
        chain.push(Arc::new(RetryMiddleware::new(retry.clone())));
    }

    tracing::debug!(
        middleware = ?chain.iter().map(|m| m.name()).collect::<Vec<_>>(),
        "middleware chain built"
    );

    Ok(chain)
}
