//! Fallback chain against a stub endpoint that routes on the requested model

use crate::integration::mock_server::{chat_completion, no_sleep_policy, MockServerFixture};
use mockito::Matcher;
use modelmux::drivers::ProviderKind;
use modelmux::types::ChatRequest;
use modelmux::{Error, Executor};
use serde_json::json;
use tokio_util::sync::CancellationToken;

async fn mock_model(fixture: &MockServerFixture, model: &str, status: usize, body: &str) -> mockito::Mock {
    let mut server = fixture.server.lock().await;
    server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::PartialJson(json!({ "model": model })))
        .with_status(status)
        .with_header("content-type", "application/json")
        .with_body(body)
        .create_async()
        .await
}

#[tokio::test]
async fn test_fallback_reports_second_model() {
    let fixture = MockServerFixture::new().await;
    let a = mock_model(
        &fixture,
        "vendor/model-a",
        400,
        r#"{"error":{"message":"model not available","code":400}}"#,
    )
    .await;
    let b = mock_model(&fixture, "vendor/model-b", 200, &chat_completion("from b")).await;

    let executor = Executor::builder(fixture.provider(ProviderKind::OpenRouter))
        .retry_policy(no_sleep_policy(2))
        .fallback("vendor/model-b")
        .build();
    let outcome = executor
        .execute(
            &ChatRequest::prompt("vendor/model-a", "hi"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.model, "vendor/model-b");
    assert_eq!(outcome.content, "from b");
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].model, "vendor/model-a");
    assert!(outcome.failures[0].error.to_string().contains("model not available"));
    a.assert_async().await;
    b.assert_async().await;
}

#[tokio::test]
async fn test_retries_sum_across_chain() {
    let fixture = MockServerFixture::new().await;
    let _a = mock_model(&fixture, "m-a", 503, r#"{"error":{"message":"busy"}}"#).await;
    let _b = mock_model(&fixture, "m-b", 200, &chat_completion("ok")).await;

    let executor = Executor::builder(fixture.provider(ProviderKind::OpenRouter))
        .retry_policy(no_sleep_policy(1))
        .fallback("m-b")
        .build();
    let outcome = executor
        .execute(&ChatRequest::prompt("m-a", "hi"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.model, "m-b");
    assert_eq!(outcome.retries, 1);
    assert!(matches!(
        outcome.failures[0].error,
        Error::RetryExhausted { attempts: 2, .. }
    ));
}

#[tokio::test]
async fn test_all_models_failing_keeps_every_error() {
    let fixture = MockServerFixture::new().await;
    let _a = mock_model(&fixture, "m-a", 404, r#"{"error":{"message":"no such model a"}}"#).await;
    let _b = mock_model(&fixture, "m-b", 404, r#"{"error":{"message":"no such model b"}}"#).await;

    let executor = Executor::builder(fixture.provider(ProviderKind::OpenRouter))
        .retry_policy(no_sleep_policy(0))
        .fallbacks(vec!["m-b".to_string()])
        .build();
    let err = executor
        .execute(&ChatRequest::prompt("m-a", "hi"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("no such model b"));
    let earlier = err.fallback_failures();
    assert_eq!(earlier.len(), 1);
    assert_eq!(earlier[0].model, "m-a");
    assert!(earlier[0].error.to_string().contains("no such model a"));
}
