//! Scripted fakes shared by unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use conduit_ir::{ChatRequest, ChatResponse, FinishReason, ResponseMetadata, StreamChunk, Usage, assistant_message};
use http::{HeaderMap, StatusCode};
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, BackendCapabilities};
use crate::error::LlmError;
use crate::stream::ChunkStream;
use crate::transport::{ByteStream, HttpRequest, HttpResponse, Transport};

/// Body delivered in reads of at most `chunk_size` bytes
pub(crate) fn byte_stream(body: &[u8], chunk_size: usize) -> ByteStream {
    let reads: Vec<Result<Bytes, LlmError>> = body
        .chunks(chunk_size.max(1))
        .map(|read| Ok(Bytes::copy_from_slice(read)))
        .collect();
    Box::pin(futures_util::stream::iter(reads))
}

enum Scripted {
    Respond(StatusCode, Vec<u8>),
    Fail(LlmError),
}

/// Transport that replays queued responses and records every request
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<HttpRequest>>,
    chunk_size: usize,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            chunk_size: usize::MAX,
        }
    }

    pub(crate) fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub(crate) fn respond(self, status: StatusCode, body: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Respond(status, body.as_bytes().to_vec()));
        self
    }

    pub(crate) fn fail(self, error: LlmError) -> Self {
        self.script.lock().unwrap().push_back(Scripted::Fail(error));
        self
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn request_json(&self, index: usize) -> serde_json::Value {
        serde_json::from_slice(&self.requests.lock().unwrap()[index].body).unwrap()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LlmError> {
        self.requests.lock().unwrap().push(request);

        match self.script.lock().unwrap().pop_front() {
            Some(Scripted::Respond(status, body)) => Ok(HttpResponse {
                status,
                headers: HeaderMap::new(),
                body: byte_stream(&body, self.chunk_size),
            }),
            Some(Scripted::Fail(error)) => Err(error),
            None => Err(LlmError::Network("no scripted response left".into())),
        }
    }
}

type ErrorFactory = fn() -> LlmError;

/// Backend that answers with fixed text or a fixed error
pub(crate) struct ScriptedBackend {
    name: String,
    reply: Result<String, ErrorFactory>,
    calls: AtomicUsize,
    healthy: AtomicBool,
    delay: Option<Duration>,
    log: Option<Arc<Mutex<Vec<String>>>>,
}

impl ScriptedBackend {
    pub(crate) fn replying(name: &str, text: &str) -> Self {
        Self::with_reply(name, Ok(text.to_owned()))
    }

    pub(crate) fn failing(name: &str, error: ErrorFactory) -> Self {
        Self::with_reply(name, Err(error))
    }

    fn with_reply(name: &str, reply: Result<String, ErrorFactory>) -> Self {
        Self {
            name: name.to_owned(),
            reply,
            calls: AtomicUsize::new(0),
            healthy: AtomicBool::new(true),
            delay: None,
            log: None,
        }
    }

    /// Append this backend's name to `log` on every call
    pub(crate) fn with_log(mut self, log: Arc<Mutex<Vec<String>>>) -> Self {
        self.log = Some(log);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    async fn record(&self) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.lock().unwrap().push(self.name.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.reply.clone().map_err(|factory| factory())
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            streaming: true,
            tool_calling: false,
            vision: false,
        }
    }

    async fn execute(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let text = self.record().await?;

        let mut metadata = ResponseMetadata::for_request(&request.metadata);
        metadata.provenance.backend = Some(self.name.clone());

        Ok(ChatResponse {
            message: assistant_message(text, Vec::new()),
            finish_reason: FinishReason::Stop,
            usage: Usage::new(3, 1),
            metadata,
        })
    }

    async fn execute_stream(&self, request: &ChatRequest, _cancel: CancellationToken) -> Result<ChunkStream, LlmError> {
        let text = self.record().await?;

        let chunks = vec![
            StreamChunk::Start {
                request_id: request.request_id().to_owned(),
                model: Some(request.model().to_owned()),
            },
            StreamChunk::content(text),
            StreamChunk::Done {
                finish_reason: FinishReason::Stop,
                usage: Some(Usage::new(3, 1)),
            },
        ];
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}
