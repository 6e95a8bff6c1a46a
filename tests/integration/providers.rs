//! Per-vendor wire contracts: paths, auth, headers and response parsing

use crate::integration::mock_server::{chat_completion, MockServerFixture};
use mockito::Matcher;
use modelmux::drivers::{Provider, ProviderConfig, ProviderKind};
use modelmux::types::{BuiltinTool, ChatRequest, ToolDefinition};
use modelmux::Executor;
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_openai_bearer_auth_and_body() {
    let fixture = MockServerFixture::new().await;
    let mock = {
        let mut server = fixture.server.lock().await;
        server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .match_body(Matcher::PartialJson(json!({
                "model": "gpt-4o",
                "stream": false,
                "messages": [{"role": "user", "content": "hi"}]
            })))
            .with_status(200)
            .with_body(chat_completion("hello"))
            .create_async()
            .await
    };

    let provider = fixture.provider(ProviderKind::OpenAi);
    let resp = provider
        .send(&ChatRequest::prompt("openai/gpt-4o", "hi"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(resp.content, "hello");
    assert_eq!(resp.usage.prompt_tokens, 7);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_azure_uses_api_key_header() {
    let fixture = MockServerFixture::new().await;
    let mock = {
        let mut server = fixture.server.lock().await;
        server
            .mock("POST", "/chat/completions")
            .match_header("api-key", "test-key")
            .match_header("authorization", Matcher::Missing)
            .with_status(200)
            .with_body(chat_completion("from azure"))
            .create_async()
            .await
    };

    let provider = fixture.provider(ProviderKind::Azure);
    let resp = provider
        .send(&ChatRequest::prompt("gpt-4o", "hi"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(resp.content, "from azure");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_openrouter_attribution_headers() {
    let fixture = MockServerFixture::new().await;
    let mock = {
        let mut server = fixture.server.lock().await;
        server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .match_header("http-referer", Matcher::Any)
            .match_header("x-title", "modelmux")
            .match_body(Matcher::PartialJson(json!({"model": "meta-llama/llama-3.3-70b"})))
            .with_status(200)
            .with_body(chat_completion("routed"))
            .create_async()
            .await
    };

    let provider = fixture.provider(ProviderKind::OpenRouter);
    let resp = provider
        .send(
            &ChatRequest::prompt("meta-llama/llama-3.3-70b", "hi"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(resp.content, "routed");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_custom_header_overrides_default() {
    let fixture = MockServerFixture::new().await;
    let mock = {
        let mut server = fixture.server.lock().await;
        server
            .mock("POST", "/chat/completions")
            .match_header("x-title", "my-app")
            .with_status(200)
            .with_body(chat_completion("ok"))
            .create_async()
            .await
    };

    let provider = Provider::new(
        ProviderKind::OpenRouter,
        ProviderConfig::new()
            .with_api_key("test-key")
            .with_base_url(&fixture.base_url)
            .with_header("X-Title", "my-app"),
    )
    .unwrap();
    provider
        .send(&ChatRequest::prompt("a/b", "hi"), &CancellationToken::new())
        .await
        .unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_anthropic_headers_and_tool_use() {
    let fixture = MockServerFixture::new().await;
    let mock = {
        let mut server = fixture.server.lock().await;
        server
            .mock("POST", "/messages")
            .match_header("x-api-key", "test-key")
            .match_header("anthropic-version", "2023-06-01")
            .match_body(Matcher::PartialJson(json!({
                "model": "claude-sonnet-4-5-20250929",
                "system": "Be brief."
            })))
            .with_status(200)
            .with_body(
                json!({
                    "id": "msg_1",
                    "type": "message",
                    "role": "assistant",
                    "content": [
                        {"type": "text", "text": "Let me check."},
                        {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "Oslo"}}
                    ],
                    "stop_reason": "tool_use",
                    "usage": {"input_tokens": 20, "output_tokens": 9}
                })
                .to_string(),
            )
            .create_async()
            .await
    };

    let request = ChatRequest::new(
        "claude-sonnet-4.5",
        vec![
            modelmux::Message::system("Be brief."),
            modelmux::Message::user("Weather in Oslo?"),
        ],
    )
    .tool(ToolDefinition::function(
        "get_weather",
        "Current weather",
        json!({"type": "object", "properties": {"city": {"type": "string"}}}),
    ));

    let outcome = Executor::new(fixture.provider(ProviderKind::Anthropic))
        .execute(&request, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.content, "Let me check.");
    assert_eq!(outcome.tool_calls.len(), 1);
    assert_eq!(outcome.tool_calls[0].id, "toolu_1");
    assert_eq!(outcome.tool_calls[0].arguments, r#"{"city":"Oslo"}"#);
    assert_eq!(outcome.finish_reason.as_deref(), Some("tool_use"));
    assert_eq!(outcome.total_tokens, 29);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_gemini_key_in_query() {
    let fixture = MockServerFixture::new().await;
    let mock = {
        let mut server = fixture.server.lock().await;
        server
            .mock(
                "POST",
                Matcher::Regex(r"^/models/gemini-2\.5-flash:generateContent".to_string()),
            )
            .match_query(Matcher::UrlEncoded("key".into(), "test-key".into()))
            .with_status(200)
            .with_body(
                json!({
                    "candidates": [{
                        "content": {"role": "model", "parts": [{"text": "Hallo"}]},
                        "finishReason": "STOP"
                    }],
                    "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2, "totalTokenCount": 6}
                })
                .to_string(),
            )
            .create_async()
            .await
    };

    let provider = fixture.provider(ProviderKind::Gemini);
    let resp = provider
        .send(&ChatRequest::prompt("gemini-2.5-flash", "hi"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(resp.content, "Hallo");
    assert_eq!(resp.usage.total_tokens, 6);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_openai_builtin_tools_use_responses_api() {
    let fixture = MockServerFixture::new().await;
    let mock = {
        let mut server = fixture.server.lock().await;
        server
            .mock("POST", "/responses")
            .match_body(Matcher::PartialJson(json!({"tools": [{"type": "web_search"}]})))
            .with_status(200)
            .with_body(
                json!({
                    "object": "response",
                    "status": "completed",
                    "output": [
                        {"type": "web_search_call", "id": "ws_1", "status": "completed"},
                        {"type": "message", "content": [{
                            "type": "output_text",
                            "text": "It is sunny.",
                            "annotations": [{"type": "url_citation", "url": "https://weather.example",
                                             "title": "Weather", "start_index": 0, "end_index": 12}]
                        }]}
                    ],
                    "usage": {"input_tokens": 11, "output_tokens": 4, "total_tokens": 15}
                })
                .to_string(),
            )
            .create_async()
            .await
    };

    let request =
        ChatRequest::prompt("gpt-4o", "Weather in Oslo?").builtin_tool(BuiltinTool::web_search());
    let outcome = Executor::new(fixture.provider(ProviderKind::OpenAi))
        .execute(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.content, "It is sunny.");
    let out = outcome.responses_output.expect("responses output");
    assert_eq!(out.citations[0].url.as_deref(), Some("https://weather.example"));
    assert_eq!(out.sources[0].url, "https://weather.example");
    assert_eq!(out.tool_calls[0].kind, "web_search_call");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_error_envelope_in_success_body() {
    let fixture = MockServerFixture::new().await;
    let _mock = fixture
        .mock_json_response(
            "/chat/completions",
            200,
            r#"{"error":{"message":"Provider returned error","code":502}}"#,
        )
        .await;

    let err = fixture
        .provider(ProviderKind::OpenRouter)
        .send(&ChatRequest::prompt("a/b", "hi"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "openrouter: [502] Provider returned error");
}

#[tokio::test]
async fn test_ollama_unreachable_hint() {
    let provider = Provider::new(
        ProviderKind::Ollama,
        ProviderConfig::new().with_base_url("http://127.0.0.1:1"),
    )
    .unwrap();
    let err = provider
        .send(&ChatRequest::prompt("llama3.2", "hi"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("is Ollama running at http://127.0.0.1:1"));
}
