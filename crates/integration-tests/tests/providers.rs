mod harness;

use std::sync::Arc;
use std::time::{Duration, Instant};

use conduit_config::{BackendConfig, BackendType};
use conduit_ir::{FinishReason, StreamChunk};
use conduit_llm::{LlmError, ReqwestTransport, build_backend};
use futures_util::StreamExt;
use harness::backends::{ALL_TYPES, backend, base_url, say_hello};
use harness::mock_provider::{DEFAULT_CONTENT, MockProvider};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn buffered_chat_against_every_provider() {
    for backend_type in ALL_TYPES {
        let mock = MockProvider::start().await.unwrap();
        let backend = backend("mock", backend_type, &mock);

        let response = backend.execute(&say_hello()).await.unwrap();

        assert_eq!(response.text(), DEFAULT_CONTENT, "{backend_type:?}");
        assert_eq!(response.finish_reason, FinishReason::Stop, "{backend_type:?}");
        assert_eq!(response.usage.prompt_tokens, 10, "{backend_type:?}");
        assert_eq!(response.usage.completion_tokens, 5, "{backend_type:?}");
        assert_eq!(response.usage.total_tokens, 15, "{backend_type:?}");
        assert_eq!(mock.chat_count(), 1);
    }
}

#[tokio::test]
async fn streamed_chat_against_every_provider() {
    for backend_type in ALL_TYPES {
        let mock = MockProvider::start().await.unwrap();
        let backend = backend("mock", backend_type, &mock);

        let chunks: Vec<StreamChunk> = backend
            .execute_stream(&say_hello(), CancellationToken::new())
            .await
            .unwrap()
            .collect()
            .await;

        let text: String = chunks
            .iter()
            .filter_map(|chunk| match chunk {
                StreamChunk::Content { delta, .. } => Some(delta.as_str()),
                _ => None,
            })
            .collect();

        assert!(matches!(chunks.first(), Some(StreamChunk::Start { .. })), "{backend_type:?}");
        assert_eq!(text, DEFAULT_CONTENT, "{backend_type:?}");
        assert!(
            matches!(
                chunks.last(),
                Some(StreamChunk::Done {
                    finish_reason: FinishReason::Stop,
                    ..
                })
            ),
            "{backend_type:?}: {chunks:?}"
        );
    }
}

#[tokio::test]
async fn anthropic_moves_system_prompt_to_side_channel() {
    let mock = MockProvider::start().await.unwrap();
    let backend = backend("claude", BackendType::Anthropic, &mock);

    backend.execute(&say_hello()).await.unwrap();

    let body = mock.last_body();
    assert_eq!(body["system"], "Be brief.");
    assert!(
        body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .all(|message| message["role"] != "system")
    );
    assert_eq!(mock.last_header("x-api-key").as_deref(), Some("test-key"));
    assert!(mock.last_header("anthropic-version").is_some());
}

#[tokio::test]
async fn gemini_sends_key_in_query() {
    let mock = MockProvider::start().await.unwrap();
    let backend = backend("gemini", BackendType::Gemini, &mock);

    backend.execute(&say_hello()).await.unwrap();

    assert_eq!(mock.last_query("key").as_deref(), Some("test-key"));
    assert!(mock.last_body()["systemInstruction"].is_object());
}

#[tokio::test]
async fn openai_sends_bearer_token() {
    let mock = MockProvider::start().await.unwrap();
    let backend = backend("openai", BackendType::Openai, &mock);

    backend.execute(&say_hello()).await.unwrap();

    assert_eq!(mock.last_header("authorization").as_deref(), Some("Bearer test-key"));
    assert_eq!(mock.last_body()["messages"][0]["role"], "system");
}

#[tokio::test]
async fn server_errors_are_classified() {
    let mock = MockProvider::start_failing(1).await.unwrap();
    let backend = backend("openai", BackendType::Openai, &mock);

    let err = backend.execute(&say_hello()).await.unwrap_err();

    assert!(matches!(err, LlmError::Provider { status: 500, .. }), "{err:?}");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn stream_open_failure_is_an_error_not_a_chunk() {
    let mock = MockProvider::start_failing(1).await.unwrap();
    let backend = backend("claude", BackendType::Anthropic, &mock);

    let result = backend.execute_stream(&say_hello(), CancellationToken::new()).await;

    assert!(matches!(result, Err(LlmError::Provider { status: 500, .. })));
}

#[tokio::test]
async fn health_checks_probe_every_provider() {
    let mock = MockProvider::start().await.unwrap();
    for backend_type in ALL_TYPES {
        assert!(backend("mock", backend_type, &mock).health_check().await, "{backend_type:?}");
    }
}

#[tokio::test]
async fn slow_provider_times_out_as_network_error() {
    let mock = MockProvider::start_slow(Duration::from_secs(5)).await.unwrap();
    let config = BackendConfig::new(BackendType::Openai)
        .with_api_key("test-key")
        .with_base_url(base_url(&mock, BackendType::Openai))
        .with_timeout(Duration::from_millis(50));
    let backend = build_backend("slow", &config, Arc::new(ReqwestTransport::new())).unwrap();

    let started = Instant::now();
    let err = backend.execute(&say_hello()).await.unwrap_err();
    assert!(matches!(err, LlmError::Network(_)), "{err:?}");
    assert!(err.is_retryable());
    assert!(started.elapsed() < Duration::from_secs(5));

    let err = backend
        .execute_stream(&say_hello(), CancellationToken::new())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, LlmError::Network(_)), "{err:?}");
}
