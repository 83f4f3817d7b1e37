//! Mock provider server for integration tests
//!
//! Serves the chat endpoints of all four provider protocols on one ephemeral
//! port with canned answers, buffered or streamed.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_CONTENT: &str = "Hello from mock provider";

/// Mock server answering every provider protocol
pub struct MockProvider {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<MockState>,
}

struct MockState {
    chat_count: AtomicU32,
    /// Chat requests to fail with 500 before succeeding
    fail_count: AtomicU32,
    content: String,
    /// Wait before answering a chat request
    delay: Option<Duration>,
    last_body: Mutex<Option<Value>>,
    last_query: Mutex<HashMap<String, String>>,
    last_headers: Mutex<HeaderMap>,
}

impl MockProvider {
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_inner(0, DEFAULT_CONTENT, None).await
    }

    /// Fail the first `n` chat requests with 500
    pub async fn start_failing(n: u32) -> anyhow::Result<Self> {
        Self::start_inner(n, DEFAULT_CONTENT, None).await
    }

    pub async fn start_with_content(content: &str) -> anyhow::Result<Self> {
        Self::start_inner(0, content, None).await
    }

    /// Answer chat requests only after `delay`
    pub async fn start_slow(delay: Duration) -> anyhow::Result<Self> {
        Self::start_inner(0, DEFAULT_CONTENT, Some(delay)).await
    }

    async fn start_inner(fail_count: u32, content: &str, delay: Option<Duration>) -> anyhow::Result<Self> {
        let state = Arc::new(MockState {
            chat_count: AtomicU32::new(0),
            fail_count: AtomicU32::new(fail_count),
            content: content.to_owned(),
            delay,
            last_body: Mutex::new(None),
            last_query: Mutex::new(HashMap::new()),
            last_headers: Mutex::new(HeaderMap::new()),
        });

        let app = Router::new()
            .route("/v1/chat/completions", routing::post(openai_chat))
            .route("/v1/messages", routing::post(anthropic_messages))
            .route("/v1/models", routing::get(models))
            .route("/v1beta/models/{action}", routing::post(gemini_generate))
            .route("/v1beta/models", routing::get(models))
            .route("/api/chat", routing::post(ollama_chat))
            .route("/api/tags", routing::get(models))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self { addr, shutdown, state })
    }

    /// Server root without any API version prefix
    pub fn root(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn chat_count(&self) -> u32 {
        self.state.chat_count.load(Ordering::Relaxed)
    }

    /// JSON body of the most recent chat request
    pub fn last_body(&self) -> Value {
        self.state.last_body.lock().unwrap().clone().unwrap_or(Value::Null)
    }

    pub fn last_query(&self, key: &str) -> Option<String> {
        self.state.last_query.lock().unwrap().get(key).cloned()
    }

    pub fn last_header(&self, name: &str) -> Option<String> {
        self.state
            .last_headers
            .lock()
            .unwrap()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
    }
}

impl Drop for MockProvider {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl MockState {
    async fn stall(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Record the request; `Some` carries the failure response to send instead
    fn record(&self, headers: &HeaderMap, query: HashMap<String, String>, body: &Value) -> Option<Response> {
        self.chat_count.fetch_add(1, Ordering::Relaxed);
        *self.last_body.lock().unwrap() = Some(body.clone());
        *self.last_query.lock().unwrap() = query;
        *self.last_headers.lock().unwrap() = headers.clone();

        let remaining = self.fail_count.load(Ordering::Relaxed);
        if remaining == 0 {
            return None;
        }
        self.fail_count.fetch_sub(1, Ordering::Relaxed);

        Some(
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": {"message": "mock server intentional failure", "type": "server_error"}})),
            )
                .into_response(),
        )
    }

    /// Content split into stream deltas, one per word
    fn pieces(&self) -> Vec<String> {
        let words: Vec<&str> = self.content.split(' ').collect();
        let last = words.len() - 1;
        words
            .iter()
            .enumerate()
            .map(|(i, word)| if i == last { (*word).to_owned() } else { format!("{word} ") })
            .collect()
    }
}

fn sse(body: String) -> Response {
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

async fn models() -> Json<Value> {
    Json(json!({"object": "list", "data": [{"id": "mock-model", "object": "model"}], "models": []}))
}

async fn openai_chat(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.stall().await;
    if let Some(failure) = state.record(&headers, HashMap::new(), &body) {
        return failure;
    }
    let model = body["model"].as_str().unwrap_or_default().to_owned();

    if !body["stream"].as_bool().unwrap_or(false) {
        return Json(json!({
            "id": "chatcmpl-mock",
            "object": "chat.completion",
            "created": 1_700_000_000,
            "model": model,
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": state.content},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }))
        .into_response();
    }

    let chunk = |delta: Value, finish_reason: Value| {
        let event = json!({
            "id": "chatcmpl-mock",
            "object": "chat.completion.chunk",
            "created": 1_700_000_000,
            "model": model,
            "choices": [{"index": 0, "delta": delta, "finish_reason": finish_reason}]
        });
        format!("data: {event}\n\n")
    };

    let mut out = chunk(json!({"role": "assistant", "content": ""}), Value::Null);
    for piece in state.pieces() {
        out.push_str(&chunk(json!({"content": piece}), Value::Null));
    }
    out.push_str(&chunk(json!({}), json!("stop")));
    out.push_str("data: [DONE]\n\n");
    sse(out)
}

async fn anthropic_messages(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.stall().await;
    if let Some(failure) = state.record(&headers, HashMap::new(), &body) {
        return failure;
    }
    let model = body["model"].as_str().unwrap_or_default().to_owned();

    if !body["stream"].as_bool().unwrap_or(false) {
        return Json(json!({
            "id": "msg_mock",
            "type": "message",
            "role": "assistant",
            "model": model,
            "content": [{"type": "text", "text": state.content}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        }))
        .into_response();
    }

    let event = |name: &str, data: Value| format!("event: {name}\ndata: {data}\n\n");

    let mut out = event(
        "message_start",
        json!({"type": "message_start", "message": {
            "id": "msg_mock", "type": "message", "role": "assistant", "model": model,
            "content": [], "usage": {"input_tokens": 10, "output_tokens": 0}
        }}),
    );
    out.push_str(&event(
        "content_block_start",
        json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
    ));
    out.push_str(&event("ping", json!({"type": "ping"})));
    for piece in state.pieces() {
        out.push_str(&event(
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": piece}}),
        ));
    }
    out.push_str(&event("content_block_stop", json!({"type": "content_block_stop", "index": 0})));
    out.push_str(&event(
        "message_delta",
        json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 5}}),
    ));
    out.push_str(&event("message_stop", json!({"type": "message_stop"})));
    sse(out)
}

async fn gemini_generate(
    State(state): State<Arc<MockState>>,
    Path(action): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.stall().await;
    if let Some(failure) = state.record(&headers, query, &body) {
        return failure;
    }

    let usage = json!({"promptTokenCount": 10, "candidatesTokenCount": 5, "totalTokenCount": 15});

    if action.ends_with(":generateContent") {
        return Json(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": state.content}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": usage
        }))
        .into_response();
    }

    let mut out = String::new();
    let pieces = state.pieces();
    let last = pieces.len() - 1;
    for (i, piece) in pieces.into_iter().enumerate() {
        let mut event = json!({"candidates": [{"content": {"role": "model", "parts": [{"text": piece}]}}]});
        if i == last {
            event["candidates"][0]["finishReason"] = json!("STOP");
            event["usageMetadata"] = usage.clone();
        }
        out.push_str(&format!("data: {event}\r\n\r\n"));
    }
    sse(out)
}

async fn ollama_chat(State(state): State<Arc<MockState>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    state.stall().await;
    if let Some(failure) = state.record(&headers, HashMap::new(), &body) {
        return failure;
    }
    let model = body["model"].as_str().unwrap_or_default().to_owned();

    if !body["stream"].as_bool().unwrap_or(true) {
        return Json(json!({
            "model": model,
            "message": {"role": "assistant", "content": state.content},
            "done": true,
            "done_reason": "stop",
            "prompt_eval_count": 10,
            "eval_count": 5
        }))
        .into_response();
    }

    let mut out = String::new();
    for piece in state.pieces() {
        let line = json!({"model": model, "message": {"role": "assistant", "content": piece}, "done": false});
        out.push_str(&format!("{line}\n"));
    }
    let last = json!({
        "model": model,
        "message": {"role": "assistant", "content": ""},
        "done": true,
        "done_reason": "stop",
        "prompt_eval_count": 10,
        "eval_count": 5
    });
    out.push_str(&format!("{last}\n"));

    (StatusCode::OK, [(header::CONTENT_TYPE, "application/x-ndjson")], out).into_response()
}
