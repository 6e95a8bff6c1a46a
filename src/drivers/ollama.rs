//! Ollama /api/chat 驱动（本地模型，NDJSON 流）。

use serde_json::{json, Value};

use super::openai::chat_tool;
use super::{
    envelope_error, resolve_model, Capabilities, DriverRequest, ProviderDriver, ProviderKind,
    VendorError,
};
use crate::pipeline::decode::{StreamFormat, StreamLine};
use crate::types::message::parse_data_uri;
use crate::types::{ChatRequest, ChatResponse, ContentBlock, Message, MessageContent, ToolCall, Usage};
use crate::Result;

#[derive(Debug, Clone, Default)]
pub struct OllamaDriver;

impl OllamaDriver {
    pub fn new() -> Self {
        Self
    }
}

/// Text parts joined by newlines; inline images go to `images`.
fn message(m: &Message) -> Value {
    let mut obj = json!({ "role": m.role.as_str(), "content": m.text() });
    if let MessageContent::Blocks(blocks) = &m.content {
        let images: Vec<&str> = blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Image { url, .. } => parse_data_uri(url).map(|(_, data)| data),
                _ => None,
            })
            .collect();
        if !images.is_empty() {
            obj["images"] = json!(images);
        }
    }
    if !m.tool_calls.is_empty() {
        let calls: Vec<Value> = m
            .tool_calls
            .iter()
            .map(|c| {
                let args = c.arguments_json().unwrap_or_else(|_| json!({}));
                json!({ "function": { "name": c.name, "arguments": args } })
            })
            .collect();
        obj["tool_calls"] = Value::Array(calls);
    }
    obj
}

fn usage_of(v: &Value) -> Usage {
    Usage::new(
        v["prompt_eval_count"].as_u64().unwrap_or(0),
        v["eval_count"].as_u64().unwrap_or(0),
    )
}

impl ProviderDriver for OllamaDriver {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            tools: true,
            vision: true,
            streaming: true,
            json: true,
            ..Default::default()
        }
    }

    fn build_request(&self, request: &ChatRequest, stream: bool) -> Result<DriverRequest> {
        let mut body = json!({
            "model": resolve_model(ProviderKind::Ollama, &request.model),
            "messages": request.messages.iter().map(message).collect::<Vec<_>>(),
            "stream": stream,
        });
        let mut options = serde_json::Map::new();
        if let Some(t) = request.temperature {
            options.insert("temperature".into(), json!(t));
        }
        if let Some(n) = request.max_tokens {
            options.insert("num_predict".into(), json!(n));
        }
        if !options.is_empty() {
            body["options"] = Value::Object(options);
        }
        if request.json_mode {
            body["format"] = json!("json");
        }
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(request.tools.iter().map(chat_tool).collect());
        }
        Ok(DriverRequest::new("/api/chat", body))
    }

    fn parse_response(&self, body: &Value) -> Result<ChatResponse> {
        if let Some(err) = self.error_envelope(body) {
            return Err(envelope_error(ProviderKind::Ollama, err));
        }
        let message = &body["message"];
        let tool_calls = message["tool_calls"]
            .as_array()
            .into_iter()
            .flatten()
            .enumerate()
            .map(|(i, c)| {
                ToolCall::from_value(
                    format!("call_{}", i),
                    c["function"]["name"].as_str().unwrap_or_default(),
                    &c["function"]["arguments"],
                )
            })
            .collect();

        Ok(ChatResponse {
            content: message["content"].as_str().unwrap_or_default().to_string(),
            tool_calls,
            usage: usage_of(body),
            finish_reason: body["done_reason"].as_str().map(String::from),
            responses_output: None,
        })
    }

    fn error_envelope(&self, body: &Value) -> Option<VendorError> {
        let msg = body.get("error")?.as_str()?;
        Some((None, msg.to_string()))
    }

    fn stream_format(&self, _request: &ChatRequest) -> StreamFormat {
        StreamFormat::Ndjson
    }

    fn parse_stream_line(&self, _event: Option<&str>, payload: &str) -> Option<StreamLine> {
        let v: Value = serde_json::from_str(payload).ok()?;
        if let Some(err) = self.error_envelope(&v) {
            return Some(StreamLine {
                error: Some(err),
                ..Default::default()
            });
        }
        let done = v["done"].as_bool().unwrap_or(false);
        Some(StreamLine {
            delta: v["message"]["content"].as_str().map(String::from),
            usage: done.then(|| usage_of(&v)),
            finish_reason: v["done_reason"].as_str().map(String::from),
            error: None,
            done,
        })
    }
}
