use async_trait::async_trait;
use conduit_ir::{ChatRequest, ChatResponse};
use tokio_util::sync::CancellationToken;

use super::{Middleware, Next};
use crate::error::LlmError;
use crate::stream::ChunkStream;

type RequestTransform = Box<dyn Fn(&mut ChatRequest) + Send + Sync>;
type ResponseTransform = Box<dyn Fn(&mut ChatResponse) + Send + Sync>;

/// Rewrites requests on the way in and responses on the way out
///
/// Requests are copied before the transform runs, so callers never see the
/// change. Response transforms apply to buffered calls only.
#[derive(Default)]
pub struct TransformMiddleware {
    request: Option<RequestTransform>,
    response: Option<ResponseTransform>,
}

impl TransformMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_request(mut self, transform: impl Fn(&mut ChatRequest) + Send + Sync + 'static) -> Self {
        self.request = Some(Box::new(transform));
        self
    }

    #[must_use]
    pub fn on_response(mut self, transform: impl Fn(&mut ChatResponse) + Send + Sync + 'static) -> Self {
        self.response = Some(Box::new(transform));
        self
    }

    fn rewrite(&self, request: &ChatRequest) -> Option<ChatRequest> {
        self.request.as_ref().map(|transform| {
            let mut copy = request.clone();
            transform(&mut copy);
            copy
        })
    }
}

#[async_trait]
impl Middleware for TransformMiddleware {
    fn name(&self) -> &'static str {
        "transform"
    }

    async fn handle(&self, request: &ChatRequest, next: Next<'_>) -> Result<ChatResponse, LlmError> {
        let rewritten = self.rewrite(request);
        let mut response = next.run(rewritten.as_ref().unwrap_or(request)).await?;

        if let Some(transform) = &self.response {
            transform(&mut response);
        }
        Ok(response)
    }

    async fn handle_stream(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
        next: Next<'_>,
    ) -> Result<ChunkStream, LlmError> {
        let rewritten = self.rewrite(request);
        next.run_stream(rewritten.as_ref().unwrap_or(request), cancel).await
    }
}
