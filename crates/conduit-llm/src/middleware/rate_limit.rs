use std::time::Duration;

use async_trait::async_trait;
use conduit_config::RateLimitConfig;
use conduit_ir::{ChatRequest, ChatResponse};
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio_util::sync::CancellationToken;

use super::{Middleware, Next};
use crate::error::LlmError;
use crate::stream::ChunkStream;

/// Client-side limit shared by every request through one chain
///
/// Requests over the limit fail with [`LlmError::RateLimited`] without
/// reaching the backend.
pub struct RateLimitMiddleware {
    limiter: DefaultDirectRateLimiter,
}

impl RateLimitMiddleware {
    pub fn new(config: &RateLimitConfig) -> Result<Self, LlmError> {
        let period = config.window / config.requests.get();
        let quota = Quota::with_period(period)
            .ok_or_else(|| LlmError::Validation("rate limit window must be greater than zero".to_owned()))?
            .allow_burst(config.requests);

        Ok(Self {
            limiter: RateLimiter::direct(quota),
        })
    }

    fn check(&self) -> Result<(), LlmError> {
        self.limiter.check().map_err(|not_until| {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            tracing::warn!(retry_after_ms = wait.as_millis(), "local rate limit exceeded");
            LlmError::RateLimited {
                message: "local rate limit exceeded".to_owned(),
                retry_after: Some(wait.max(Duration::from_millis(1))),
            }
        })
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn handle(&self, request: &ChatRequest, next: Next<'_>) -> Result<ChatResponse, LlmError> {
        self.check()?;
        next.run(request).await
    }

    async fn handle_stream(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
        next: Next<'_>,
    ) -> Result<ChunkStream, LlmError> {
        self.check()?;
        next.run_stream(request, cancel).await
    }
}
