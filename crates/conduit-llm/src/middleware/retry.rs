use std::time::Duration;

use async_trait::async_trait;
use conduit_config::RetryConfig;
use conduit_ir::{ChatRequest, ChatResponse};
use rand::Rng;
use tokio_util::sync::CancellationToken;

use super::{Middleware, Next};
use crate::error::LlmError;
use crate::stream::ChunkStream;

/// Repeats retryable failures with exponential backoff
///
/// A provider's `retry-after` hint replaces the computed delay. Streams are
/// only retried while opening; once chunks flow, failures reach the caller.
#[derive(Debug, Clone)]
pub struct RetryMiddleware {
    config: RetryConfig,
}

impl RetryMiddleware {
    pub const fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay before retry number `attempt` (zero-based)
    fn delay(&self, attempt: u32, error: &LlmError) -> Duration {
        if let Some(hint) = error.retry_after() {
            return hint.min(self.config.max_delay);
        }

        let base = self
            .config
            .initial_delay
            .saturating_mul(2_u32.saturating_pow(attempt))
            .min(self.config.max_delay);

        if self.config.jitter {
            base.mul_f64(rand::rng().random_range(0.5..=1.0))
        } else {
            base
        }
    }

    /// Whether to try again after `error` on attempt `attempt`; sleeps if so
    ///
    /// Cancellation cuts the sleep short and ends the retries.
    async fn should_retry(&self, attempt: u32, error: &LlmError, backend: &str, cancel: &CancellationToken) -> bool {
        if attempt >= self.config.max_retries || !error.is_retryable() {
            return false;
        }

        let delay = self.delay(attempt, error);
        tracing::warn!(
            backend = %backend,
            attempt = attempt + 1,
            max_retries = self.config.max_retries,
            delay_ms = delay.as_millis(),
            error = %error,
            "retrying request"
        );
        tokio::select! {
            () = cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }
}

#[async_trait]
impl Middleware for RetryMiddleware {
    fn name(&self) -> &'static str {
        "retry"
    }

    async fn handle(&self, request: &ChatRequest, next: Next<'_>) -> Result<ChatResponse, LlmError> {
        let never = CancellationToken::new();
        let mut attempt = 0;
        loop {
            match next.run(request).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if !self.should_retry(attempt, &e, next.backend_name(), &never).await {
                        return Err(e);
                    }
                }
            }
            attempt += 1;
        }
    }

    async fn handle_stream(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
        next: Next<'_>,
    ) -> Result<ChunkStream, LlmError> {
        let mut attempt = 0;
        loop {
            match next.run_stream(request, cancel.clone()).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    if cancel.is_cancelled() || !self.should_retry(attempt, &e, next.backend_name(), &cancel).await {
                        return Err(e);
                    }
                }
            }
            attempt += 1;
        }
    }
}
