//! Response cache in front of a stub endpoint

use crate::integration::mock_server::{chat_completion, MockServerFixture};
use modelmux::cache::{CacheConfig, ResponseCache};
use modelmux::drivers::ProviderKind;
use modelmux::types::{ChatRequest, ToolDefinition};
use modelmux::{ExecutionContext, Executor};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_second_identical_call_is_served_from_cache() {
    let fixture = MockServerFixture::new().await;
    let mock = {
        let mut server = fixture.server.lock().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(chat_completion("cached answer"))
            .expect(1)
            .create_async()
            .await
    };

    let cache = Arc::new(ResponseCache::new(CacheConfig::new()));
    let executor = Executor::builder(fixture.provider(ProviderKind::OpenAi))
        .cache(cache.clone())
        .build();
    let request = ChatRequest::prompt("gpt-4o-mini", "What is 2+2?").temperature(0.0);
    let cancel = CancellationToken::new();

    let first = executor.execute(&request, &cancel).await.unwrap();
    let second = executor.execute(&request, &cancel).await.unwrap();

    assert_eq!(first.content, second.content);
    assert!(second.cached);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.stats().hits, 1);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_different_temperature_misses() {
    let fixture = MockServerFixture::new().await;
    let mock = {
        let mut server = fixture.server.lock().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(chat_completion("x"))
            .expect(2)
            .create_async()
            .await
    };

    let executor = Executor::builder(fixture.provider(ProviderKind::OpenAi))
        .context(ExecutionContext::new().with_default_cache())
        .build();
    let cancel = CancellationToken::new();
    let base = ChatRequest::prompt("gpt-4o-mini", "same words");
    executor.execute(&base.clone().temperature(0.1), &cancel).await.unwrap();
    executor.execute(&base.temperature(0.9), &cancel).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_tool_requests_bypass_cache() {
    let fixture = MockServerFixture::new().await;
    let mock = {
        let mut server = fixture.server.lock().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(chat_completion("no tool needed"))
            .expect(2)
            .create_async()
            .await
    };

    let cache = Arc::new(ResponseCache::default());
    let executor = Executor::builder(fixture.provider(ProviderKind::OpenAi))
        .cache(cache.clone())
        .build();
    let request = ChatRequest::prompt("gpt-4o", "weather?").tool(ToolDefinition::function(
        "get_weather",
        "Current weather",
        json!({"type": "object"}),
    ));
    let cancel = CancellationToken::new();
    executor.execute(&request, &cancel).await.unwrap();
    executor.execute(&request, &cancel).await.unwrap();

    assert!(cache.is_empty());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_switching_cache_off_at_runtime() {
    let fixture = MockServerFixture::new().await;
    let mock = {
        let mut server = fixture.server.lock().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(chat_completion("fresh"))
            .expect(2)
            .create_async()
            .await
    };

    let cache = Arc::new(ResponseCache::default());
    let executor = Executor::builder(fixture.provider(ProviderKind::OpenAi))
        .cache(cache.clone())
        .build();
    let request = ChatRequest::prompt("gpt-4o", "hi");
    let cancel = CancellationToken::new();

    executor.execute(&request, &cancel).await.unwrap();
    cache.set_enabled(false);
    let second = executor.execute(&request, &cancel).await.unwrap();
    assert!(!second.cached);
    mock.assert_async().await;
}
