//! OpenRouter 驱动：OpenAI 兼容的聚合网关。

use serde_json::{json, Value};

use super::openai::{
    chat_messages, chat_stream_line, chat_tool, openai_error_envelope, parse_chat_completion,
};
use super::{
    envelope_error, resolve_model, Capabilities, DriverRequest, ProviderDriver, ProviderKind,
    VendorError,
};
use crate::pipeline::decode::{StreamFormat, StreamLine};
use crate::types::{ChatRequest, ChatResponse};
use crate::Result;

/// Attribution headers OpenRouter shows on its dashboards.
const REFERER: &str = "https://github.com/modelmux/modelmux";
const TITLE: &str = "modelmux";

#[derive(Debug, Clone, Default)]
pub struct OpenRouterDriver;

impl OpenRouterDriver {
    pub fn new() -> Self {
        Self
    }
}

impl ProviderDriver for OpenRouterDriver {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenRouter
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            tools: true,
            vision: true,
            streaming: true,
            json: true,
            reasoning: true,
            ..Default::default()
        }
    }

    fn default_headers(&self) -> Vec<(String, String)> {
        vec![
            ("HTTP-Referer".to_string(), REFERER.to_string()),
            ("X-Title".to_string(), TITLE.to_string()),
        ]
    }

    fn build_request(&self, request: &ChatRequest, stream: bool) -> Result<DriverRequest> {
        let mut body = json!({
            "model": resolve_model(ProviderKind::OpenRouter, &request.model),
            "messages": chat_messages(&request.messages),
            "stream": stream,
        });
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(n) = request.max_tokens {
            body["max_tokens"] = json!(n);
        }
        if let Some(effort) = request.reasoning {
            body["reasoning"] = json!(effort.as_str());
        }
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(request.tools.iter().map(chat_tool).collect());
            body["tool_choice"] = json!("auto");
        }
        if request.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }
        Ok(DriverRequest::new("/chat/completions", body))
    }

    fn parse_response(&self, body: &Value) -> Result<ChatResponse> {
        if let Some(err) = self.error_envelope(body) {
            return Err(envelope_error(ProviderKind::OpenRouter, err));
        }
        parse_chat_completion(ProviderKind::OpenRouter, body)
    }

    fn error_envelope(&self, body: &Value) -> Option<VendorError> {
        openai_error_envelope(body)
    }

    fn stream_format(&self, _request: &ChatRequest) -> StreamFormat {
        StreamFormat::Sse {
            sentinel: Some("[DONE]"),
        }
    }

    fn parse_stream_line(&self, _event: Option<&str>, payload: &str) -> Option<StreamLine> {
        let v: Value = serde_json::from_str(payload).ok()?;
        if let Some(err) = openai_error_envelope(&v) {
            return Some(StreamLine {
                error: Some(err),
                ..Default::default()
            });
        }
        Some(chat_stream_line(&v))
    }
}
