use std::collections::VecDeque;

use conduit_ir::{ErrorKind, FinishReason, StreamChunk, ToolUseDelta, Usage};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use super::{ChunkStream, LineBuffer, SseDecoder, SseLine};
use crate::transport::ByteStream;

/// How a provider frames its event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `event:` / `data:` lines separated by blank lines
    Sse,
    /// One JSON object per line
    Ndjson,
}

/// IR-visible effect of one provider event
#[derive(Debug, Clone, PartialEq)]
pub enum Mapped {
    Content(String),
    ToolUse(ToolUseDelta),
    Metadata(serde_json::Value),
    /// Finish reason to report once the stream ends
    Finish(FinishReason),
    /// Token counts; either side may arrive in a separate event
    Usage {
        prompt: Option<u32>,
        completion: Option<u32>,
    },
    /// Provider signalled the end of the stream
    Terminate,
    /// Provider reported a failure inside the stream
    Error {
        kind: ErrorKind,
        message: String,
        status: Option<u16>,
    },
}

/// Per-provider lookup from parsed payloads to IR effects
///
/// Events with no IR-visible effect map to nothing.
pub trait ChunkMapper: Send + 'static {
    fn map(&mut self, event: Option<&str>, payload: serde_json::Value) -> Vec<Mapped>;
}

/// Identity of the stream being normalized
#[derive(Debug, Clone)]
pub struct StreamContext {
    pub framing: Framing,
    /// Backend name for logs
    pub backend: String,
    pub request_id: String,
    pub model: Option<String>,
}

struct Normalizer<M> {
    /// Dropped on every exit path, which releases the connection
    body: Option<ByteStream>,
    lines: LineBuffer,
    sse: SseDecoder,
    mapper: M,
    framing: Framing,
    backend: String,
    cancel: CancellationToken,
    pending: VecDeque<StreamChunk>,
    finish: Option<FinishReason>,
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    saw_tools: bool,
    finished: bool,
}

enum Read {
    Cancelled,
    Next(Option<Result<bytes::Bytes, crate::error::LlmError>>),
}

/// Turn a provider byte stream into a well-formed IR chunk stream
///
/// The result always starts with `start` and ends with exactly one `done` or
/// `error`, unless the token is cancelled, in which case it simply stops.
pub fn normalize<M: ChunkMapper>(
    body: ByteStream,
    context: StreamContext,
    mapper: M,
    cancel: CancellationToken,
) -> ChunkStream {
    let StreamContext {
        framing,
        backend,
        request_id,
        model,
    } = context;

    let state = Normalizer {
        body: Some(body),
        lines: LineBuffer::new(),
        sse: SseDecoder::new(),
        mapper,
        framing,
        backend,
        cancel,
        pending: VecDeque::from([StreamChunk::Start { request_id, model }]),
        finish: None,
        prompt_tokens: None,
        completion_tokens: None,
        saw_tools: false,
        finished: false,
    };

    Box::pin(futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if state.cancel.is_cancelled() {
                state.abandon();
                return None;
            }
            if let Some(chunk) = state.pending.pop_front() {
                return Some((chunk, state));
            }
            if state.finished {
                return None;
            }

            let Some(body) = state.body.as_mut() else {
                state.complete();
                continue;
            };

            let read = tokio::select! {
                biased;
                () = state.cancel.cancelled() => Read::Cancelled,
                next = body.next() => Read::Next(next),
            };

            match read {
                Read::Cancelled => {
                    state.abandon();
                    return None;
                }
                Read::Next(Some(Ok(bytes))) => {
                    for line in state.lines.push(&bytes) {
                        state.handle_line(&line);
                        if state.finished {
                            break;
                        }
                    }
                }
                Read::Next(Some(Err(err))) => {
                    tracing::warn!(backend = %state.backend, error = %err, "provider stream failed");
                    state.fail(err.to_chunk());
                }
                Read::Next(None) => {
                    if let Some(rest) = state.lines.finish() {
                        state.handle_line(&rest);
                    }
                    state.complete();
                }
            }
        }
    }))
}

impl<M: ChunkMapper> Normalizer<M> {
    fn handle_line(&mut self, line: &str) {
        if self.finished {
            return;
        }

        match self.framing {
            Framing::Sse => match self.sse.feed(line) {
                SseLine::Data { event, data } => {
                    if data.trim() == "[DONE]" {
                        self.complete();
                        return;
                    }
                    match serde_json::from_str(&data) {
                        Ok(payload) => self.apply(event.as_deref(), payload),
                        Err(e) => {
                            tracing::debug!(backend = %self.backend, error = %e, "skipping unparseable data payload");
                        }
                    }
                }
                SseLine::Bare(text) => match serde_json::from_str(&text) {
                    Ok(payload) => self.apply(None, payload),
                    Err(_) => self.fail(StreamChunk::error(
                        ErrorKind::Stream,
                        format!("malformed stream line: {}", truncate(&text)),
                    )),
                },
                SseLine::Skip => {}
            },
            Framing::Ndjson => {
                let line = line.trim();
                if line.is_empty() {
                    return;
                }
                match serde_json::from_str(line) {
                    Ok(payload) => self.apply(None, payload),
                    Err(e) => {
                        tracing::debug!(backend = %self.backend, error = %e, "skipping unparseable stream line");
                    }
                }
            }
        }
    }

    fn apply(&mut self, event: Option<&str>, payload: serde_json::Value) {
        for mapped in self.mapper.map(event, payload) {
            match mapped {
                Mapped::Content(delta) => {
                    if !delta.is_empty() {
                        self.pending.push_back(StreamChunk::Content { delta });
                    }
                }
                Mapped::ToolUse(delta) => {
                    self.saw_tools = true;
                    self.pending.push_back(StreamChunk::ToolUse(delta));
                }
                Mapped::Metadata(data) => self.pending.push_back(StreamChunk::Metadata { data }),
                Mapped::Finish(reason) => self.finish = Some(reason),
                Mapped::Usage { prompt, completion } => {
                    if prompt.is_some() {
                        self.prompt_tokens = prompt;
                    }
                    if completion.is_some() {
                        self.completion_tokens = completion;
                    }
                }
                Mapped::Terminate => {
                    self.complete();
                    return;
                }
                Mapped::Error { kind, message, status } => {
                    tracing::warn!(backend = %self.backend, %kind, error = %message, "provider reported a stream error");
                    self.fail(StreamChunk::Error { kind, message, status });
                    return;
                }
            }
        }
    }

    /// Emit the terminal `done`, synthesizing it when the provider never sent one
    fn complete(&mut self) {
        if self.finished {
            return;
        }

        let default_reason = if self.saw_tools {
            FinishReason::ToolUse
        } else {
            FinishReason::Stop
        };
        let usage = (self.prompt_tokens.is_some() || self.completion_tokens.is_some()).then(|| {
            Usage::new(
                self.prompt_tokens.unwrap_or(0),
                self.completion_tokens.unwrap_or(0),
            )
        });

        self.pending.push_back(StreamChunk::Done {
            finish_reason: self.finish.unwrap_or(default_reason),
            usage,
        });
        self.finished = true;
        self.body = None;
    }

    fn fail(&mut self, chunk: StreamChunk) {
        if self.finished {
            return;
        }
        self.pending.push_back(chunk);
        self.finished = true;
        self.body = None;
    }

    /// Stop without a terminal chunk; the caller went away
    fn abandon(&mut self) {
        if self.body.is_some() {
            tracing::debug!(backend = %self.backend, "stream cancelled by caller");
        }
        self.pending.clear();
        self.finished = true;
        self.body = None;
    }
}

fn truncate(text: &str) -> &str {
    const LIMIT: usize = 120;
    match text.char_indices().nth(LIMIT) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use conduit_ir::validate_sequence;

    use super::*;
    use crate::testing::byte_stream;

    /// `{"text": ...}` is content, `{"finish": ...}` a finish reason,
    /// `{"end": true}` terminates and `{"fail": ...}` errors
    struct TextMapper;

    impl ChunkMapper for TextMapper {
        fn map(&mut self, _event: Option<&str>, payload: serde_json::Value) -> Vec<Mapped> {
            let mut out = Vec::new();
            if let Some(text) = payload["text"].as_str() {
                out.push(Mapped::Content(text.to_owned()));
            }
            if payload["finish"] == "length" {
                out.push(Mapped::Finish(FinishReason::Length));
            }
            if let Some(tokens) = payload["tokens"].as_u64() {
                out.push(Mapped::Usage {
                    prompt: Some(1),
                    completion: u32::try_from(tokens).ok(),
                });
            }
            if payload["end"] == true {
                out.push(Mapped::Terminate);
            }
            if let Some(message) = payload["fail"].as_str() {
                out.push(Mapped::Error {
                    kind: ErrorKind::Provider,
                    message: message.to_owned(),
                    status: None,
                });
            }
            out
        }
    }

    fn context(framing: Framing) -> StreamContext {
        StreamContext {
            framing,
            backend: "test".into(),
            request_id: "req-1".into(),
            model: Some("m".into()),
        }
    }

    async fn run(body: &[u8], chunk_size: usize, framing: Framing) -> Vec<StreamChunk> {
        normalize(
            byte_stream(body, chunk_size),
            context(framing),
            TextMapper,
            CancellationToken::new(),
        )
        .collect()
        .await
    }

    fn text_of(chunks: &[StreamChunk]) -> String {
        chunks
            .iter()
            .filter_map(|chunk| match chunk {
                StreamChunk::Content { delta } => Some(delta.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn sse_stream_is_well_formed() {
        let body = b"data: {\"text\":\"Hel\"}\n\ndata: {\"text\":\"lo\"}\n\ndata: {\"finish\":\"length\",\"tokens\":2}\n\ndata: [DONE]\n\n";
        let chunks = run(body, body.len(), Framing::Sse).await;

        validate_sequence(&chunks).unwrap();
        assert_eq!(text_of(&chunks), "Hello");
        assert_eq!(
            chunks.last(),
            Some(&StreamChunk::Done {
                finish_reason: FinishReason::Length,
                usage: Some(Usage::new(1, 2)),
            })
        );
    }

    #[tokio::test]
    async fn any_split_point_yields_the_same_chunks() {
        let body = "data: {\"text\":\"hi\"}\n\nevent: x\ndata: {\"text\":\"é!\"}\n\ndata: [DONE]\n\n".as_bytes();
        let whole = run(body, body.len(), Framing::Sse).await;

        for size in 1..body.len() {
            assert_eq!(run(body, size, Framing::Sse).await, whole, "chunk size {size}");
        }
    }

    #[tokio::test]
    async fn missing_terminator_is_synthesized() {
        let chunks = run(b"data: {\"text\":\"partial\"}\n", 4, Framing::Sse).await;
        validate_sequence(&chunks).unwrap();
        assert_eq!(text_of(&chunks), "partial");
        assert!(matches!(
            chunks.last(),
            Some(StreamChunk::Done {
                finish_reason: FinishReason::Stop,
                usage: None
            })
        ));
    }

    #[tokio::test]
    async fn bad_data_payload_is_skipped() {
        let chunks = run(b"data: {not json\n\ndata: {\"text\":\"ok\"}\n\n", 7, Framing::Sse).await;
        validate_sequence(&chunks).unwrap();
        assert_eq!(text_of(&chunks), "ok");
    }

    #[tokio::test]
    async fn malformed_bare_line_is_a_stream_error() {
        let chunks = run(b"data: {\"text\":\"a\"}\n\n<html>oops</html>\ndata: {\"text\":\"b\"}\n\n", 64, Framing::Sse).await;
        validate_sequence(&chunks).unwrap();
        assert_eq!(text_of(&chunks), "a");
        assert!(matches!(
            chunks.last(),
            Some(StreamChunk::Error {
                kind: ErrorKind::Stream,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn provider_error_ends_stream() {
        let chunks = run(b"data: {\"text\":\"a\"}\n\ndata: {\"fail\":\"overloaded\"}\n\ndata: {\"text\":\"b\"}\n\n", 5, Framing::Sse).await;
        validate_sequence(&chunks).unwrap();
        assert_eq!(chunks.len(), 3);
        assert!(matches!(&chunks[2], StreamChunk::Error { message, .. } if message == "overloaded"));
    }

    #[tokio::test]
    async fn ndjson_terminates_on_mapper_signal() {
        let body = b"{\"text\":\"a\"}\nnot json\n{\"text\":\"b\"}\n{\"end\":true}\n{\"text\":\"ignored\"}\n";
        let chunks = run(body, 3, Framing::Ndjson).await;
        validate_sequence(&chunks).unwrap();
        assert_eq!(text_of(&chunks), "ab");
    }

    #[tokio::test]
    async fn network_error_becomes_error_chunk() {
        let body: ByteStream = Box::pin(futures_util::stream::iter(vec![
            Ok(bytes::Bytes::from_static(b"data: {\"text\":\"a\"}\n\n")),
            Err(crate::error::LlmError::Network("connection reset".into())),
        ]));
        let chunks: Vec<_> = normalize(body, context(Framing::Sse), TextMapper, CancellationToken::new())
            .collect()
            .await;

        validate_sequence(&chunks).unwrap();
        assert!(matches!(
            chunks.last(),
            Some(StreamChunk::Error {
                kind: ErrorKind::Network,
                ..
            })
        ));
    }

    /// Body that records when it is dropped and never ends on its own
    struct Tracked {
        dropped: Arc<AtomicBool>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn cancellation_stops_and_releases_body() {
        let dropped = Arc::new(AtomicBool::new(false));
        let guard = Tracked {
            dropped: Arc::clone(&dropped),
        };
        let first = futures_util::stream::iter(vec![Ok(bytes::Bytes::from_static(b"data: {\"text\":\"a\"}\n\n"))]);
        let rest = futures_util::stream::pending().map(move |item| {
            let _ = &guard;
            item
        });
        let body: ByteStream = Box::pin(first.chain(rest));

        let cancel = CancellationToken::new();
        let mut stream = normalize(body, context(Framing::Sse), TextMapper, cancel.clone());

        assert!(matches!(stream.next().await, Some(StreamChunk::Start { .. })));
        assert_eq!(stream.next().await, Some(StreamChunk::content("a")));

        cancel.cancel();
        assert_eq!(stream.next().await, None);
        assert!(dropped.load(Ordering::SeqCst));
    }
}
