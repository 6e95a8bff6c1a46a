//! Anthropic Messages API 驱动：处理与 OpenAI 线路格式的差异。
//!
//! - System messages become the top-level `system` field.
//! - Content is a list of typed blocks; media uses `source` objects.
//! - `max_tokens` is mandatory.
//! - Streaming is event-typed SSE: `content_block_delta` carries text,
//!   `message_stop` ends the stream.

use serde_json::{json, Value};
use tracing::debug;

use super::{
    envelope_error, malformed, resolve_model, Capabilities, DriverRequest, ProviderDriver,
    ProviderKind, VendorError,
};
use crate::pipeline::decode::{StreamFormat, StreamLine};
use crate::types::message::parse_data_uri;
use crate::types::{
    ChatRequest, ChatResponse, ContentBlock, Message, MessageContent, MessageRole,
    ReasoningEffort, ToolCall, Usage,
};
use crate::Result;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 8192;

/// Extended-thinking budget for a reasoning level.
fn thinking_budget(effort: ReasoningEffort) -> u32 {
    match effort {
        ReasoningEffort::Minimal | ReasoningEffort::Low => 1024,
        ReasoningEffort::Medium => 4096,
        ReasoningEffort::High => 16384,
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnthropicDriver;

impl AnthropicDriver {
    pub fn new() -> Self {
        Self
    }

    /// Extract system messages and translate the rest.
    /// Anthropic requires system as a top-level param, not in messages array.
    fn split_system_messages(messages: &[Message]) -> (Option<String>, Vec<Value>) {
        let mut system_parts: Vec<String> = Vec::new();
        let mut out: Vec<Value> = Vec::new();

        for m in messages {
            match m.role {
                MessageRole::System => system_parts.push(m.text()),
                MessageRole::Tool => out.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": m.tool_call_id.clone().unwrap_or_default(),
                        "content": m.text(),
                    }],
                })),
                MessageRole::Assistant => {
                    let mut blocks = content_blocks(&m.content);
                    for c in &m.tool_calls {
                        let input = c.arguments_json().unwrap_or_else(|_| json!({}));
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": c.id,
                            "name": c.name,
                            "input": input,
                        }));
                    }
                    out.push(json!({ "role": "assistant", "content": blocks }));
                }
                MessageRole::User => out.push(json!({
                    "role": "user",
                    "content": content_blocks(&m.content),
                })),
            }
        }

        let system = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));
        (system, out)
    }
}

fn content_blocks(content: &MessageContent) -> Vec<Value> {
    match content {
        MessageContent::Text(s) if s.is_empty() => Vec::new(),
        MessageContent::Text(s) => vec![json!({ "type": "text", "text": s })],
        MessageContent::Blocks(blocks) => blocks.iter().filter_map(content_block).collect(),
    }
}

fn content_block(block: &ContentBlock) -> Option<Value> {
    match block {
        ContentBlock::Text { text } => Some(json!({ "type": "text", "text": text })),
        ContentBlock::Image { url, .. } => {
            let source = match parse_data_uri(url) {
                Some((mime, data)) => {
                    json!({ "type": "base64", "media_type": mime, "data": data })
                }
                None => json!({ "type": "url", "url": url }),
            };
            Some(json!({ "type": "image", "source": source }))
        }
        ContentBlock::Document { source } => {
            let src = match (&source.data, &source.url) {
                (Some(data), _) => json!({
                    "type": "base64",
                    "media_type": source.mime_type,
                    "data": data,
                }),
                (None, Some(url)) => json!({ "type": "url", "url": url }),
                (None, None) => return None,
            };
            Some(json!({ "type": "document", "source": src }))
        }
    }
}

fn usage_of(u: &Value) -> Usage {
    Usage::new(
        u["input_tokens"].as_u64().unwrap_or(0),
        u["output_tokens"].as_u64().unwrap_or(0),
    )
}

impl ProviderDriver for AnthropicDriver {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            tools: true,
            vision: true,
            streaming: true,
            json: false,
            reasoning: true,
            pdf: true,
            ..Default::default()
        }
    }

    fn default_headers(&self) -> Vec<(String, String)> {
        vec![("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string())]
    }

    fn build_request(&self, request: &ChatRequest, stream: bool) -> Result<DriverRequest> {
        let (system, msgs) = Self::split_system_messages(&request.messages);
        let mut max_tokens = request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);

        let mut body = json!({
            "model": resolve_model(ProviderKind::Anthropic, &request.model),
            "messages": msgs,
            "stream": stream,
        });
        if let Some(sys) = system {
            body["system"] = Value::String(sys);
        }
        match request.reasoning {
            Some(effort) => {
                let budget = thinking_budget(effort);
                // The budget counts against max_tokens and must stay below it.
                if max_tokens <= budget {
                    max_tokens = budget + DEFAULT_MAX_TOKENS;
                }
                body["thinking"] = json!({ "type": "enabled", "budget_tokens": budget });
                if request.temperature.is_some() {
                    debug!("temperature dropped: extended thinking requires the default");
                }
            }
            None => {
                if let Some(t) = request.temperature {
                    body["temperature"] = json!(t);
                }
            }
        }
        body["max_tokens"] = json!(max_tokens);
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.function.name,
                        "description": t.function.description,
                        "input_schema": t.parameters(),
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }

        Ok(DriverRequest::new("/messages", body))
    }

    fn parse_response(&self, body: &Value) -> Result<ChatResponse> {
        if let Some(err) = self.error_envelope(body) {
            return Err(envelope_error(ProviderKind::Anthropic, err));
        }
        let blocks = body["content"]
            .as_array()
            .ok_or_else(|| malformed(ProviderKind::Anthropic, "no content in response"))?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for b in blocks {
            match b["type"].as_str() {
                Some("text") => content.push_str(b["text"].as_str().unwrap_or_default()),
                Some("tool_use") => tool_calls.push(ToolCall::from_value(
                    b["id"].as_str().unwrap_or_default(),
                    b["name"].as_str().unwrap_or_default(),
                    &b["input"],
                )),
                _ => {}
            }
        }

        Ok(ChatResponse {
            content,
            tool_calls,
            usage: usage_of(&body["usage"]),
            finish_reason: body["stop_reason"].as_str().map(String::from),
            responses_output: None,
        })
    }

    fn error_envelope(&self, body: &Value) -> Option<VendorError> {
        let err = body.get("error").filter(|e| e.is_object())?;
        Some((
            err["type"].as_str().map(String::from),
            err["message"].as_str().unwrap_or_default().to_string(),
        ))
    }

    fn stream_format(&self, _request: &ChatRequest) -> StreamFormat {
        StreamFormat::TypedSse
    }

    fn parse_stream_line(&self, event: Option<&str>, payload: &str) -> Option<StreamLine> {
        let v: Value = serde_json::from_str(payload).ok()?;
        let kind = v["type"].as_str().or(event).unwrap_or_default();
        let line = match kind {
            "content_block_delta" => match v["delta"]["type"].as_str() {
                Some("text_delta") | None => {
                    StreamLine::delta(v["delta"]["text"].as_str().unwrap_or_default())
                }
                Some(_) => StreamLine::default(),
            },
            "message_start" => StreamLine {
                usage: Some(usage_of(&v["message"]["usage"])),
                ..Default::default()
            },
            "message_delta" => StreamLine {
                usage: Some(usage_of(&v["usage"])),
                finish_reason: v["delta"]["stop_reason"].as_str().map(String::from),
                ..Default::default()
            },
            "message_stop" => StreamLine::done(),
            "error" => StreamLine {
                error: self.error_envelope(&v),
                ..Default::default()
            },
            _ => StreamLine::default(),
        };
        Some(line)
    }
}
