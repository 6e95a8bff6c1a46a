//! Mock vendor endpoint for integration tests

use mockito::{Matcher, Mock, Server, ServerGuard};
use modelmux::drivers::{Provider, ProviderConfig, ProviderKind};
use modelmux::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Test fixture that owns a mock server
pub struct MockServerFixture {
    pub server: Arc<Mutex<ServerGuard>>,
    pub base_url: String,
}

impl MockServerFixture {
    pub async fn new() -> Self {
        let server = Server::new_async().await;
        let base_url = server.url();
        Self {
            server: Arc::new(Mutex::new(server)),
            base_url,
        }
    }

    /// Adapter of `kind` pointed at the mock server with a dummy key
    pub fn provider(&self, kind: ProviderKind) -> Provider {
        Provider::new(
            kind,
            ProviderConfig::new()
                .with_api_key("test-key")
                .with_base_url(&self.base_url)
                .with_timeout(Duration::from_secs(5)),
        )
        .expect("mock provider")
    }

    /// SSE body: one `data:` line per chunk
    pub async fn mock_sse_stream(&self, path: impl Into<Matcher>, chunks: &[&str]) -> Mock {
        let body: String = chunks
            .iter()
            .map(|chunk| format!("data: {}\n\n", chunk))
            .collect();
        self.mock_body(path, "text/event-stream", body).await
    }

    /// SSE body with an `event:` line before every `data:` line
    pub async fn mock_typed_sse(&self, path: impl Into<Matcher>, events: &[(&str, &str)]) -> Mock {
        let body: String = events
            .iter()
            .map(|(event, data)| format!("event: {}\ndata: {}\n\n", event, data))
            .collect();
        self.mock_body(path, "text/event-stream", body).await
    }

    /// Newline-delimited JSON body
    pub async fn mock_ndjson_stream(&self, path: impl Into<Matcher>, lines: &[&str]) -> Mock {
        let body: String = lines.iter().map(|l| format!("{}\n", l)).collect();
        self.mock_body(path, "application/x-ndjson", body).await
    }

    /// JSON response with the given status
    pub async fn mock_json_response(
        &self,
        path: impl Into<Matcher>,
        status: usize,
        body: &str,
    ) -> Mock {
        let mut server = self.server.lock().await;
        server
            .mock("POST", path)
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }

    async fn mock_body(&self, path: impl Into<Matcher>, content_type: &str, body: String) -> Mock {
        let mut server = self.server.lock().await;
        server
            .mock("POST", path)
            .with_status(200)
            .with_header("content-type", content_type)
            .with_body(body)
            .create_async()
            .await
    }
}

/// Retries without waiting, so tests stay fast
pub fn no_sleep_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy::default()
        .with_max_retries(max_retries)
        .with_initial_delay(Duration::ZERO)
        .with_jitter(0.0)
}

/// OpenAI-style chat completion body
pub fn chat_completion(content: &str) -> String {
    serde_json::json!({
        "id": "chatcmpl-1",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 7, "completion_tokens": 3, "total_tokens": 10}
    })
    .to_string()
}
