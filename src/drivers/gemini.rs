//! Google Gemini generateContent 驱动。
//!
//! Differences from the OpenAI dialect: `assistant` is spelled `model`,
//! system prompts go to `systemInstruction`, media is inline base64
//! (`inlineData`) or a file URI (`fileData`), and the model id is part of
//! the URL path.

use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::debug;

use super::{
    code_string, envelope_error, malformed, resolve_model, Capabilities, DriverRequest,
    ProviderDriver, ProviderKind, VendorError,
};
use crate::pipeline::decode::{StreamFormat, StreamLine};
use crate::types::message::parse_data_uri;
use crate::types::{
    ChatRequest, ChatResponse, ContentBlock, Message, MessageContent, MessageRole, ToolCall, Usage,
};
use crate::Result;

#[derive(Debug, Clone, Default)]
pub struct GeminiDriver;

impl GeminiDriver {
    pub fn new() -> Self {
        Self
    }

    fn contents(messages: &[Message]) -> (Option<String>, Vec<Value>) {
        let mut system_parts = Vec::new();
        let mut contents = Vec::new();
        // functionResponse needs the function name, not the call id.
        let mut call_names: HashMap<&str, &str> = HashMap::new();

        for m in messages {
            let (role, parts) = match m.role {
                MessageRole::System => {
                    system_parts.push(m.text());
                    continue;
                }
                MessageRole::Tool => {
                    let id = m.tool_call_id.as_deref().unwrap_or_default();
                    let name = call_names.get(id).copied().unwrap_or(id);
                    let part = json!({
                        "functionResponse": {
                            "name": name,
                            "response": { "content": m.text() },
                        },
                    });
                    ("user", vec![part])
                }
                MessageRole::Assistant => {
                    let mut parts = parts_of(&m.content);
                    for c in &m.tool_calls {
                        call_names.insert(c.id.as_str(), c.name.as_str());
                        let args = c.arguments_json().unwrap_or_else(|_| json!({}));
                        parts.push(json!({ "functionCall": { "name": c.name, "args": args } }));
                    }
                    ("model", parts)
                }
                MessageRole::User => ("user", parts_of(&m.content)),
            };
            if parts.is_empty() {
                continue;
            }
            contents.push(json!({ "role": role, "parts": parts }));
        }

        let system = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));
        (system, contents)
    }
}

fn parts_of(content: &MessageContent) -> Vec<Value> {
    match content {
        MessageContent::Text(s) if s.is_empty() => Vec::new(),
        MessageContent::Text(s) => vec![json!({ "text": s })],
        MessageContent::Blocks(blocks) => blocks.iter().filter_map(part).collect(),
    }
}

fn part(block: &ContentBlock) -> Option<Value> {
    match block {
        ContentBlock::Text { text } => Some(json!({ "text": text })),
        ContentBlock::Image { url, .. } => match parse_data_uri(url) {
            Some((mime, data)) => Some(json!({ "inlineData": { "mimeType": mime, "data": data } })),
            None => {
                debug!("gemini: remote image URLs are not inlined, part dropped");
                None
            }
        },
        ContentBlock::Document { source } => match (&source.data, &source.url) {
            (Some(data), _) => Some(json!({
                "inlineData": { "mimeType": source.mime_type, "data": data },
            })),
            (None, Some(url)) => Some(json!({
                "fileData": { "mimeType": source.mime_type, "fileUri": url },
            })),
            (None, None) => None,
        },
    }
}

fn usage_of(meta: &Value) -> Option<Usage> {
    if !meta.is_object() {
        return None;
    }
    let prompt = meta["promptTokenCount"].as_u64().unwrap_or(0);
    let completion = meta["candidatesTokenCount"].as_u64().unwrap_or(0);
    let total = meta["totalTokenCount"]
        .as_u64()
        .unwrap_or(prompt + completion);
    Some(Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: total,
    })
}

fn candidate_text(candidate: &Value) -> String {
    candidate["content"]["parts"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|p| p["text"].as_str())
        .collect()
}

impl ProviderDriver for GeminiDriver {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            tools: true,
            vision: true,
            streaming: true,
            json: true,
            reasoning: true,
            pdf: true,
            ..Default::default()
        }
    }

    fn build_request(&self, request: &ChatRequest, stream: bool) -> Result<DriverRequest> {
        let model = resolve_model(ProviderKind::Gemini, &request.model);
        let (system, contents) = Self::contents(&request.messages);

        let mut body = json!({ "contents": contents });
        if let Some(sys) = system {
            body["systemInstruction"] = json!({ "parts": [{ "text": sys }] });
        }

        let mut config = serde_json::Map::new();
        if let Some(t) = request.temperature {
            config.insert("temperature".into(), json!(t));
        }
        if let Some(n) = request.max_tokens {
            config.insert("maxOutputTokens".into(), json!(n));
        }
        if request.json_mode {
            config.insert("responseMimeType".into(), json!("application/json"));
        }
        if let Some(effort) = request.reasoning {
            config.insert(
                "thinkingConfig".into(),
                json!({ "thinkingLevel": effort.as_str() }),
            );
        }
        body["generationConfig"] = Value::Object(config);

        if !request.tools.is_empty() {
            let decls: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.function.name,
                        "description": t.function.description,
                        "parameters": t.parameters(),
                    })
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": decls }]);
        }

        let path = if stream {
            format!("/models/{}:streamGenerateContent?alt=sse", model)
        } else {
            format!("/models/{}:generateContent", model)
        };
        Ok(DriverRequest::new(path, body))
    }

    fn parse_response(&self, body: &Value) -> Result<ChatResponse> {
        if let Some(err) = self.error_envelope(body) {
            return Err(envelope_error(ProviderKind::Gemini, err));
        }
        let candidate = body
            .pointer("/candidates/0")
            .ok_or_else(|| malformed(ProviderKind::Gemini, "no response candidates"))?;

        let tool_calls = candidate["content"]["parts"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|p| p.get("functionCall"))
            .enumerate()
            .map(|(i, fc)| {
                ToolCall::from_value(
                    format!("call_{}", i),
                    fc["name"].as_str().unwrap_or_default(),
                    &fc["args"],
                )
            })
            .collect();

        Ok(ChatResponse {
            content: candidate_text(candidate),
            tool_calls,
            usage: usage_of(&body["usageMetadata"]).unwrap_or_default(),
            finish_reason: candidate["finishReason"].as_str().map(String::from),
            responses_output: None,
        })
    }

    fn error_envelope(&self, body: &Value) -> Option<VendorError> {
        let err = body.get("error").filter(|e| e.is_object())?;
        Some((
            code_string(&err["status"]).or_else(|| code_string(&err["code"])),
            err["message"].as_str().unwrap_or_default().to_string(),
        ))
    }

    fn stream_format(&self, _request: &ChatRequest) -> StreamFormat {
        StreamFormat::Sse { sentinel: None }
    }

    fn parse_stream_line(&self, _event: Option<&str>, payload: &str) -> Option<StreamLine> {
        let v: Value = serde_json::from_str(payload).ok()?;
        if let Some(err) = self.error_envelope(&v) {
            return Some(StreamLine {
                error: Some(err),
                ..Default::default()
            });
        }
        let candidate = &v["candidates"][0];
        Some(StreamLine {
            delta: Some(candidate_text(candidate)),
            usage: usage_of(&v["usageMetadata"]),
            finish_reason: candidate["finishReason"].as_str().map(String::from),
            ..Default::default()
        })
    }
}
