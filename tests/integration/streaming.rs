//! Integration tests for streaming responses

use crate::integration::mock_server::{no_sleep_policy, MockServerFixture};
use mockito::Matcher;
use modelmux::drivers::{ChatProvider, ProviderKind};
use modelmux::types::ChatRequest;
use modelmux::{Error, Executor};
use tokio_util::sync::CancellationToken;

async fn collect(
    provider: &dyn ChatProvider,
    request: &ChatRequest,
) -> (Vec<String>, modelmux::Result<modelmux::ChatResponse>) {
    let mut seen = Vec::new();
    let result = provider
        .send_stream(
            request,
            &mut |d: &str| seen.push(d.to_string()),
            &CancellationToken::new(),
        )
        .await;
    (seen, result)
}

#[tokio::test]
async fn test_sse_with_sentinel() {
    let fixture = MockServerFixture::new().await;
    let mock = fixture
        .mock_sse_stream(
            "/chat/completions",
            &[
                r#"{"choices":[{"delta":{"role":"assistant"},"index":0}]}"#,
                r#"{"choices":[{"delta":{"content":"Hel"},"index":0}]}"#,
                r#"{"choices":[{"delta":{"content":"lo"},"index":0}]}"#,
                "[DONE]",
            ],
        )
        .await;

    let executor = Executor::new(fixture.provider(ProviderKind::OpenAi));
    let mut seen = Vec::new();
    let outcome = executor
        .execute_stream(
            &ChatRequest::prompt("gpt-4o-mini", "Say hello"),
            &mut |d: &str| seen.push(d.to_string()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(seen, vec!["Hel", "lo"]);
    assert_eq!(outcome.content, "Hello");
    assert!(outcome.completion_tokens > 0);
    assert!(outcome.total_tokens > 0);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_stream_request_sets_stream_flag() {
    let fixture = MockServerFixture::new().await;
    let mut server = fixture.server.lock().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "stream": true,
            "stream_options": {"include_usage": true}
        })))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body("data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\ndata: [DONE]\n\n")
        .create_async()
        .await;
    drop(server);

    let provider = fixture.provider(ProviderKind::OpenAi);
    let (seen, result) = collect(&provider, &ChatRequest::prompt("gpt-4o", "hi")).await;
    assert_eq!(seen, vec!["ok"]);
    assert_eq!(result.unwrap().content, "ok");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_ndjson_with_done_flag() {
    let fixture = MockServerFixture::new().await;
    let _mock = fixture
        .mock_ndjson_stream(
            "/api/chat",
            &[
                r#"{"message":{"role":"assistant","content":"Hel"},"done":false}"#,
                r#"{"message":{"role":"assistant","content":"lo"},"done":false}"#,
                r#"{"message":{"role":"assistant","content":""},"done":true,"done_reason":"stop","prompt_eval_count":5,"eval_count":2}"#,
            ],
        )
        .await;

    let provider = fixture.provider(ProviderKind::Ollama);
    let (seen, result) = collect(&provider, &ChatRequest::prompt("llama3.2", "hi")).await;
    let resp = result.unwrap();
    assert_eq!(seen.concat(), resp.content);
    assert_eq!(resp.content, "Hello");
    assert_eq!(resp.usage.prompt_tokens, 5);
    assert_eq!(resp.usage.completion_tokens, 2);
    assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
}

#[tokio::test]
async fn test_typed_sse_events() {
    let fixture = MockServerFixture::new().await;
    let _mock = fixture
        .mock_typed_sse(
            "/messages",
            &[
                ("message_start", r#"{"type":"message_start","message":{"usage":{"input_tokens":12,"output_tokens":1}}}"#),
                ("content_block_start", r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#),
                ("ping", r#"{"type":"ping"}"#),
                ("content_block_delta", r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}"#),
                ("content_block_delta", r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"lo"}}"#),
                ("message_delta", r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":4}}"#),
                ("message_stop", r#"{"type":"message_stop"}"#),
            ],
        )
        .await;

    let provider = fixture.provider(ProviderKind::Anthropic);
    let (seen, result) =
        collect(&provider, &ChatRequest::prompt("claude-haiku-4.5", "hi")).await;
    let resp = result.unwrap();
    assert_eq!(seen, vec!["Hel", "lo"]);
    assert_eq!(resp.content, "Hello");
    assert_eq!(resp.usage.prompt_tokens, 12);
    assert_eq!(resp.usage.completion_tokens, 4);
    assert_eq!(resp.finish_reason.as_deref(), Some("end_turn"));
}

#[tokio::test]
async fn test_sse_without_sentinel_ends_at_eof() {
    let fixture = MockServerFixture::new().await;
    let _mock = fixture
        .mock_sse_stream(
            Matcher::Regex(r"^/models/gemini-2\.5-flash:streamGenerateContent".to_string()),
            &[
                r#"{"candidates":[{"content":{"parts":[{"text":"Hel"}],"role":"model"}}]}"#,
                r#"{"candidates":[{"content":{"parts":[{"text":"lo"}],"role":"model"},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":3,"candidatesTokenCount":2,"totalTokenCount":5}}"#,
            ],
        )
        .await;

    let provider = fixture.provider(ProviderKind::Gemini);
    let (seen, result) =
        collect(&provider, &ChatRequest::prompt("google/gemini-2.5-flash", "hi")).await;
    let resp = result.unwrap();
    assert_eq!(seen, vec!["Hel", "lo"]);
    assert_eq!(resp.usage.total_tokens, 5);
    assert_eq!(resp.finish_reason.as_deref(), Some("STOP"));
}

#[tokio::test]
async fn test_malformed_lines_are_skipped() {
    let fixture = MockServerFixture::new().await;
    let _mock = fixture
        .mock_sse_stream(
            "/chat/completions",
            &[
                r#"{"choices":[{"delta":{"content":"a"}}]}"#,
                "{not json",
                r#"{"choices":[{"delta":{"content":"b"}}]}"#,
                "[DONE]",
            ],
        )
        .await;

    let provider = fixture.provider(ProviderKind::OpenRouter);
    let (seen, result) = collect(&provider, &ChatRequest::prompt("x/y", "hi")).await;
    assert_eq!(seen, vec!["a", "b"]);
    assert_eq!(result.unwrap().content, "ab");
}

#[tokio::test]
async fn test_error_status_is_read_whole() {
    let fixture = MockServerFixture::new().await;
    let _mock = fixture
        .mock_json_response(
            "/chat/completions",
            500,
            r#"{"error":{"message":"upstream exploded","type":"server_error"}}"#,
        )
        .await;

    let provider = fixture.provider(ProviderKind::OpenAi);
    let (seen, result) = collect(&provider, &ChatRequest::prompt("gpt-4o", "hi")).await;
    assert!(seen.is_empty());
    let err = result.unwrap_err();
    let pe = err.provider_error().expect("provider error");
    assert_eq!(pe.status(), Some(500));
    assert!(err.to_string().contains("upstream exploded"));
}

#[tokio::test]
async fn test_error_event_mid_stream() {
    let fixture = MockServerFixture::new().await;
    let _mock = fixture
        .mock_typed_sse(
            "/messages",
            &[
                ("content_block_delta", r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"par"}}"#),
                ("error", r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#),
            ],
        )
        .await;

    let provider = fixture.provider(ProviderKind::Anthropic);
    let (seen, result) = collect(&provider, &ChatRequest::prompt("claude-opus-4.5", "hi")).await;
    assert_eq!(seen, vec!["par"]);
    let err = result.unwrap_err();
    assert!(matches!(err, Error::Provider(_)));
    assert_eq!(err.to_string(), "anthropic: [overloaded_error] Overloaded");
}

#[tokio::test]
async fn test_executor_does_not_replay_interrupted_stream() {
    let fixture = MockServerFixture::new().await;
    let mock = fixture
        .mock_typed_sse(
            "/messages",
            &[
                ("content_block_delta", r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"par"}}"#),
                ("error", r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#),
            ],
        )
        .await;

    let executor = Executor::builder(fixture.provider(ProviderKind::Anthropic))
        .retry_policy(no_sleep_policy(3))
        .fallback("claude-haiku-4.5")
        .build();
    let mut seen = Vec::new();
    let err = executor
        .execute_stream(
            &ChatRequest::prompt("claude-opus-4.5", "hi"),
            &mut |d: &str| seen.push(d.to_string()),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(seen, vec!["par"]);
    assert!(matches!(err, Error::StreamInterrupted { delivered: 1, .. }));
    assert_eq!(
        err.provider_error().and_then(|p| p.code.as_deref()),
        Some("overloaded_error")
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn test_cancelled_stream() {
    let fixture = MockServerFixture::new().await;
    let _mock = fixture
        .mock_sse_stream("/chat/completions", &[r#"{"choices":[{"delta":{"content":"x"}}]}"#])
        .await;

    let provider = fixture.provider(ProviderKind::OpenAi);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = provider
        .send_stream(&ChatRequest::prompt("gpt-4o", "hi"), &mut |_: &str| {}, &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancellation());
}
