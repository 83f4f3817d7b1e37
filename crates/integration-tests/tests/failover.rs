mod harness;

use std::sync::Arc;
use std::time::Duration;

use conduit_config::{BackendType, RetryConfig};
use conduit_llm::middleware::RetryMiddleware;
use conduit_llm::{Backend, Bridge, LlmError, OpenAiFrontend, Router, RouterEvent, Strategy};
use futures_util::StreamExt;
use harness::backends::{backend, say_hello};
use harness::mock_provider::MockProvider;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn primary_succeeds_without_failover() {
    let primary = MockProvider::start_with_content("primary response").await.unwrap();
    let backup = MockProvider::start_with_content("backup response").await.unwrap();

    let router = Router::builder()
        .backend(backend("primary", BackendType::Openai, &primary))
        .backend(backend("backup", BackendType::Anthropic, &backup))
        .strategy(Strategy::Priority)
        .build()
        .unwrap();

    let response = router.execute(&say_hello()).await.unwrap();

    assert_eq!(response.text(), "primary response");
    assert_eq!(primary.chat_count(), 1);
    assert_eq!(backup.chat_count(), 0);
}

#[tokio::test]
async fn failing_primary_falls_back_across_protocols() {
    let primary = MockProvider::start_failing(u32::MAX).await.unwrap();
    let backup = MockProvider::start_with_content("backup response").await.unwrap();

    let router = Router::builder()
        .backend(backend("primary", BackendType::Openai, &primary))
        .backend(backend("backup", BackendType::Gemini, &backup))
        .strategy(Strategy::Priority)
        .build()
        .unwrap();
    let mut events = router.subscribe();

    for _ in 0..3 {
        let response = router.execute(&say_hello()).await.unwrap();
        assert_eq!(response.text(), "backup response");
        assert_eq!(response.metadata.provenance.backend.as_deref(), Some("backup"));
    }

    assert_eq!(primary.chat_count(), 3);
    assert_eq!(backup.chat_count(), 3);

    let switches = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|event| matches!(event, RouterEvent::BackendSwitch { .. }))
        .count();
    assert_eq!(switches, 3);
}

#[tokio::test]
async fn exhausted_router_reports_last_error() {
    let first = MockProvider::start_failing(u32::MAX).await.unwrap();
    let second = MockProvider::start_failing(u32::MAX).await.unwrap();

    let router = Router::builder()
        .backend(backend("first", BackendType::Ollama, &first))
        .backend(backend("second", BackendType::Anthropic, &second))
        .build()
        .unwrap();

    let err = router.execute(&say_hello()).await.unwrap_err();

    let LlmError::Exhausted { attempts, last } = err else {
        panic!("expected exhaustion, got {err:?}");
    };
    assert_eq!(attempts, 2);
    assert!(matches!(*last, LlmError::Provider { status: 500, .. }));
}

#[tokio::test]
async fn streams_fail_over_while_opening() {
    let primary = MockProvider::start_failing(u32::MAX).await.unwrap();
    let backup = MockProvider::start_with_content("streamed backup").await.unwrap();

    let router = Router::builder()
        .backend(backend("primary", BackendType::Anthropic, &primary))
        .backend(backend("backup", BackendType::Ollama, &backup))
        .strategy(Strategy::Priority)
        .build()
        .unwrap();

    let text: String = router
        .execute_stream(&say_hello(), CancellationToken::new())
        .await
        .unwrap()
        .filter_map(|chunk| async move {
            match chunk {
                conduit_ir::StreamChunk::Content { delta } => Some(delta),
                _ => None,
            }
        })
        .collect()
        .await;

    assert_eq!(text, "streamed backup");
}

#[tokio::test]
async fn retry_middleware_recovers_same_backend() {
    let mock = MockProvider::start_failing(2).await.unwrap();

    let bridge = Bridge::new(OpenAiFrontend::new(), backend("flaky", BackendType::Openai, &mock)).with_middleware(
        Arc::new(RetryMiddleware::new(RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            jitter: false,
        })),
    );

    let response = bridge.chat_ir(say_hello()).await.unwrap();

    assert_eq!(response.text(), harness::mock_provider::DEFAULT_CONTENT);
    assert_eq!(mock.chat_count(), 3);
}
