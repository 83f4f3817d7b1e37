//! One frontend, one backend and the middleware between them

use std::pin::Pin;
use std::sync::Arc;

use conduit_ir::{ChatRequest, ChatResponse, StreamChunk, StreamFailure};
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::backend::Backend;
use crate::error::LlmError;
use crate::frontend::Frontend;
use crate::middleware::{Middleware, Next};
use crate::stream::ChunkStream;

/// Native events from a stream; an error ends the stream
pub type NativeStream<T> = Pin<Box<dyn Stream<Item = Result<T, LlmError>> + Send>>;

/// Callable API pairing a frontend with a backend
///
/// The backend may be a [`Router`](crate::router::Router). Middleware wrap
/// the backend call in registration order.
pub struct Bridge<F: Frontend> {
    frontend: Arc<F>,
    backend: Arc<dyn Backend>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl<F: Frontend> Bridge<F> {
    pub fn new(frontend: F, backend: Arc<dyn Backend>) -> Self {
        Self {
            frontend: Arc::new(frontend),
            backend,
            middleware: Vec::new(),
        }
    }

    /// Append a middleware; the first one added is outermost
    #[must_use]
    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    #[must_use]
    pub fn with_chain(mut self, chain: impl IntoIterator<Item = Arc<dyn Middleware>>) -> Self {
        self.middleware.extend(chain);
        self
    }

    pub fn frontend(&self) -> &F {
        &self.frontend
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Native request in, native response out
    pub async fn chat(&self, request: F::Request) -> Result<F::Response, LlmError> {
        let request = self.frontend.to_ir(request)?;
        let response = self.chat_ir(request).await?;
        Ok(self.frontend.from_ir(&response))
    }

    /// IR request through the middleware chain to the backend
    pub async fn chat_ir(&self, mut request: ChatRequest) -> Result<ChatResponse, LlmError> {
        self.stamp(&mut request);

        let mut response = Next::new(&self.middleware, self.backend.as_ref()).run(&request).await?;

        let provenance = &mut response.metadata.provenance;
        if provenance.frontend.is_none() {
            provenance.frontend.clone_from(&request.metadata.provenance.frontend);
        }
        if provenance.backend.is_none() {
            provenance.backend = Some(self.backend.name().to_owned());
        }
        Ok(response)
    }

    /// Native request in, native events out
    ///
    /// Error chunks end the stream as an `Err` item.
    pub async fn chat_stream(
        &self,
        request: F::Request,
        cancel: CancellationToken,
    ) -> Result<NativeStream<F::Chunk>, LlmError> {
        let mut request = self.frontend.to_ir(request)?;
        request.stream = true;

        let chunks = self.chat_stream_ir(request, cancel).await?;
        let frontend = Arc::clone(&self.frontend);
        let mut state = F::StreamState::default();

        let native = chunks.flat_map(move |chunk| futures_util::stream::iter(render(frontend.as_ref(), &mut state, chunk)));

        Ok(Box::pin(native))
    }

    /// Native events framed for a `text/event-stream` body
    ///
    /// The trailer follows only a stream that reached its `done` chunk.
    pub async fn chat_stream_sse(
        &self,
        request: F::Request,
        cancel: CancellationToken,
    ) -> Result<NativeStream<String>, LlmError> {
        let mut request = self.frontend.to_ir(request)?;
        request.stream = true;

        let chunks = self.chat_stream_ir(request, cancel).await?;
        let frontend = Arc::clone(&self.frontend);
        let trailer = self.frontend.end_of_stream();
        let mut state = F::StreamState::default();
        let mut done = false;
        let mut clean = true;

        // `None` marks the end of the chunks
        let framed = chunks
            .map(Some)
            .chain(futures_util::stream::iter([None]))
            .flat_map(move |chunk| {
                let frames: Vec<Result<String, LlmError>> = match chunk {
                    Some(chunk) => {
                        done |= matches!(chunk, StreamChunk::Done { .. });
                        render(frontend.as_ref(), &mut state, chunk)
                            .into_iter()
                            .map(|event| event.and_then(|event| frontend.encode_sse(&event)))
                            .collect()
                    }
                    None if done && clean => trailer.map(|trailer| Ok(trailer.to_owned())).into_iter().collect(),
                    None => Vec::new(),
                };
                clean &= frames.iter().all(Result::is_ok);
                futures_util::stream::iter(frames)
            });

        Ok(Box::pin(framed))
    }

    /// IR request in, IR chunks out
    pub async fn chat_stream_ir(&self, mut request: ChatRequest, cancel: CancellationToken) -> Result<ChunkStream, LlmError> {
        self.stamp(&mut request);
        request.stream = true;

        Next::new(&self.middleware, self.backend.as_ref())
            .run_stream(&request, cancel)
            .await
    }

    /// Release the backend's resources
    pub async fn destroy(&self) {
        self.backend.destroy().await;
    }

    fn stamp(&self, request: &mut ChatRequest) {
        let provenance = &mut request.metadata.provenance;
        if provenance.frontend.is_none() {
            provenance.frontend = Some(self.frontend.name().to_owned());
        }
    }
}

/// Native events for one IR chunk; an error chunk becomes an `Err`
fn render<F: Frontend>(frontend: &F, state: &mut F::StreamState, chunk: StreamChunk) -> Vec<Result<F::Chunk, LlmError>> {
    match chunk {
        StreamChunk::Error { kind, message, status } => vec![Err(LlmError::from(StreamFailure { kind, message, status }))],
        chunk => frontend.render_chunk(state, &chunk).into_iter().map(Ok).collect(),
    }
}
