use std::time::Instant;

use async_trait::async_trait;
use conduit_ir::{ChatRequest, ChatResponse, StreamChunk};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::{Middleware, Next};
use crate::error::LlmError;
use crate::stream::ChunkStream;

/// Span per request with latency, usage and outcome
#[derive(Debug, Default)]
pub struct LoggingMiddleware;

impl LoggingMiddleware {
    pub const fn new() -> Self {
        Self
    }
}

fn request_span(request: &ChatRequest, backend: &str, stream: bool) -> tracing::Span {
    tracing::info_span!(
        "chat",
        request_id = %request.request_id(),
        model = %request.model(),
        backend = %backend,
        stream,
    )
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn handle(&self, request: &ChatRequest, next: Next<'_>) -> Result<ChatResponse, LlmError> {
        let span = request_span(request, next.backend_name(), false);

        async move {
            let started = Instant::now();
            tracing::debug!(messages = request.messages.len(), "request started");

            let result = next.run(request).await;
            let latency_ms = started.elapsed().as_millis();

            match &result {
                Ok(response) => tracing::info!(
                    latency_ms,
                    prompt_tokens = response.usage.prompt_tokens,
                    completion_tokens = response.usage.completion_tokens,
                    finish_reason = ?response.finish_reason,
                    "request completed"
                ),
                Err(e) => tracing::warn!(latency_ms, kind = %e.kind(), error = %e, "request failed"),
            }

            result
        }
        .instrument(span)
        .await
    }

    async fn handle_stream(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
        next: Next<'_>,
    ) -> Result<ChunkStream, LlmError> {
        let span = request_span(request, next.backend_name(), true);
        let started = Instant::now();

        let stream = match next.run_stream(request, cancel).instrument(span.clone()).await {
            Ok(stream) => stream,
            Err(e) => {
                span.in_scope(|| tracing::warn!(kind = %e.kind(), error = %e, "stream failed to open"));
                return Err(e);
            }
        };

        let mut chunks = 0_usize;
        let logged = stream.inspect(move |chunk| {
            chunks += 1;
            let _entered = span.enter();
            match chunk {
                StreamChunk::Done { finish_reason, usage } => tracing::info!(
                    latency_ms = started.elapsed().as_millis(),
                    chunks,
                    finish_reason = ?finish_reason,
                    total_tokens = usage.map(|u| u.total_tokens),
                    "stream completed"
                ),
                StreamChunk::Error { kind, message, .. } => tracing::warn!(
                    latency_ms = started.elapsed().as_millis(),
                    chunks,
                    kind = %kind,
                    error = %message,
                    "stream ended with error"
                ),
                _ => {}
            }
        });

        Ok(Box::pin(logged))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use conduit_ir::Message;

    use super::*;
    use crate::testing::ScriptedBackend;

    #[tokio::test]
    async fn passes_responses_and_chunks_through() {
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(LoggingMiddleware::new())];
        let backend = ScriptedBackend::replying("b", "OK");
        let request = ChatRequest::new("m", vec![Message::user("hi")]);

        let response = Next::new(&chain, &backend).run(&request).await.unwrap();
        assert_eq!(response.text(), "OK");

        let chunks: Vec<_> = Next::new(&chain, &backend)
            .run_stream(&request, CancellationToken::new())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(chunks.len(), 3);
    }
}
