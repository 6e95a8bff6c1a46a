//! Batch execution against a stub endpoint

use crate::integration::mock_server::{chat_completion, no_sleep_policy, MockServerFixture};
use mockito::Matcher;
use modelmux::batch::BatchConfig;
use modelmux::drivers::ProviderKind;
use modelmux::types::ChatRequest;
use modelmux::Executor;
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_batch_prompts_fill_every_slot() {
    let fixture = MockServerFixture::new().await;
    let mock = {
        let mut server = fixture.server.lock().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(chat_completion("answer"))
            .expect(4)
            .create_async()
            .await
    };

    let executor = Executor::new(fixture.provider(ProviderKind::OpenAi));
    let results = executor
        .batch_prompts(
            "gpt-4o-mini",
            ["one", "two", "three", "four"],
            BatchConfig::new().with_max_concurrency(2),
            &CancellationToken::new(),
        )
        .await;

    let slots = results.into_inner();
    assert_eq!(slots.len(), 4);
    for (i, slot) in slots.iter().enumerate() {
        assert_eq!(slot.index, i);
        assert!(slot.is_ok());
        assert_eq!(slot.content, "answer");
        assert_eq!(slot.tokens, 10);
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn test_batch_failure_stays_in_its_slot() {
    let fixture = MockServerFixture::new().await;
    {
        let mut server = fixture.server.lock().await;
        server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::Regex("poison".to_string()))
            .with_status(400)
            .with_body(r#"{"error":{"message":"content rejected"}}"#)
            .create_async()
            .await;
    }
    let _ok = fixture
        .mock_json_response("/chat/completions", 200, &chat_completion("fine"))
        .await;

    let executor = Executor::builder(fixture.provider(ProviderKind::OpenAi))
        .retry_policy(no_sleep_policy(0))
        .build();
    let results = executor
        .batch_prompts(
            "gpt-4o-mini",
            ["a", "poison", "c"],
            BatchConfig::new(),
            &CancellationToken::new(),
        )
        .await;

    let (contents, first_error) = results.strings();
    assert_eq!(contents, vec!["fine", "", "fine"]);
    assert!(first_error.unwrap().to_string().contains("content rejected"));
    assert!((results.success_rate() - 2.0 / 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_batch_models_one_prompt() {
    let fixture = MockServerFixture::new().await;
    for model in ["m-1", "m-2"] {
        let mut server = fixture.server.lock().await;
        server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::PartialJson(json!({ "model": model })))
            .with_status(200)
            .with_body(chat_completion(model))
            .create_async()
            .await;
    }

    let executor = Executor::new(fixture.provider(ProviderKind::OpenRouter));
    let models = vec!["m-1".to_string(), "m-2".to_string()];
    let results = executor
        .batch_models(
            &ChatRequest::prompt("ignored", "compare"),
            &models,
            BatchConfig::new().with_timeout(Duration::from_secs(5)),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(results.contents(), vec!["m-1", "m-2"]);
    assert_eq!(results.total_tokens(), 20);
}
