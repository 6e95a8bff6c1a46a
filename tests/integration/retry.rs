//! Retry behaviour end to end: status codes from the stub endpoint drive the classifier

use crate::integration::mock_server::{chat_completion, no_sleep_policy, MockServerFixture};
use modelmux::drivers::ProviderKind;
use modelmux::types::ChatRequest;
use modelmux::{Error, Executor};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_429_twice_then_success() {
    let fixture = MockServerFixture::new().await;
    let limited = {
        let mut server = fixture.server.lock().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body(r#"{"error":{"message":"Rate limit reached","type":"requests"}}"#)
            .expect(2)
            .create_async()
            .await
    };
    let ok = fixture
        .mock_json_response("/chat/completions", 200, &chat_completion("finally"))
        .await;

    let executor = Executor::builder(fixture.provider(ProviderKind::OpenAi))
        .retry_policy(no_sleep_policy(2))
        .build();
    let outcome = executor
        .execute(&ChatRequest::prompt("gpt-4o-mini", "hi"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.content, "finally");
    assert_eq!(outcome.retries, 2);
    assert_eq!(outcome.total_tokens, 10);
    assert_eq!(executor.context().stats_snapshot().retries, 2);
    limited.assert_async().await;
    ok.assert_async().await;
}

#[tokio::test]
async fn test_terminal_status_is_attempted_once() {
    let fixture = MockServerFixture::new().await;
    let mock = {
        let mut server = fixture.server.lock().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body(r#"{"error":{"message":"Incorrect API key provided","code":"invalid_api_key"}}"#)
            .expect(1)
            .create_async()
            .await
    };

    let executor = Executor::builder(fixture.provider(ProviderKind::OpenAi))
        .retry_policy(no_sleep_policy(5))
        .build();
    let err = executor
        .execute(&ChatRequest::prompt("gpt-4o", "hi"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "openai: [401] invalid_api_key: Incorrect API key provided"
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn test_exhausted_retries_name_attempts() {
    let fixture = MockServerFixture::new().await;
    let mock = {
        let mut server = fixture.server.lock().await;
        server
            .mock("POST", "/messages")
            .with_status(529)
            .with_body(r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#)
            .expect(3)
            .create_async()
            .await
    };

    let executor = Executor::builder(fixture.provider(ProviderKind::Anthropic))
        .retry_policy(no_sleep_policy(2))
        .build();
    let err = executor
        .execute(&ChatRequest::prompt("claude-sonnet-4.5", "hi"), &CancellationToken::new())
        .await
        .unwrap_err();

    match &err {
        Error::RetryExhausted {
            max_retries,
            attempts,
            last,
        } => {
            assert_eq!(*max_retries, 2);
            assert_eq!(*attempts, 3);
            assert!(last.to_string().contains("Overloaded"));
        }
        other => panic!("expected RetryExhausted, got {other:?}"),
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn test_cancelled_before_sending() {
    let fixture = MockServerFixture::new().await;
    let mock = {
        let mut server = fixture.server.lock().await;
        server
            .mock("POST", "/chat/completions")
            .expect(0)
            .create_async()
            .await
    };

    let cancel = CancellationToken::new();
    cancel.cancel();
    let executor = Executor::new(fixture.provider(ProviderKind::OpenAi));
    let err = executor
        .execute(&ChatRequest::prompt("gpt-4o", "hi"), &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancellation());
    mock.assert_async().await;
}
