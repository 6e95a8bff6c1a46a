//! OpenAI 驱动：Chat Completions 与 Responses API（Azure 复用同一线路格式）。
//!
//! Requests carrying built-in tools go to `/responses`; everything else goes
//! to `/chat/completions`. Azure deployments speak the chat dialect with an
//! `api-key` header and no built-in tools.

use serde_json::{json, Map, Value};
use tracing::debug;

use super::{
    code_string, envelope_error, malformed, resolve_model, Capabilities, DriverRequest,
    ProviderDriver, ProviderKind, VendorError,
};
use crate::pipeline::decode::{StreamFormat, StreamLine};
use crate::types::message::parse_data_uri;
use crate::types::{
    BuiltinToolCall, ChatRequest, ChatResponse, Citation, ContentBlock, DocumentSource, Message,
    MessageContent, MessageRole, ResponsesOutput, Source, ToolCall, ToolDefinition, Usage,
};
use crate::Result;

#[derive(Debug, Clone)]
pub struct OpenAiDriver {
    kind: ProviderKind,
}

impl Default for OpenAiDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenAiDriver {
    pub fn new() -> Self {
        Self {
            kind: ProviderKind::OpenAi,
        }
    }

    pub fn azure() -> Self {
        Self {
            kind: ProviderKind::Azure,
        }
    }

    fn uses_responses_api(&self, request: &ChatRequest) -> bool {
        self.kind == ProviderKind::OpenAi && !request.builtin_tools.is_empty()
    }

    fn build_chat(&self, request: &ChatRequest, stream: bool) -> DriverRequest {
        let mut body = json!({
            "model": resolve_model(self.kind, &request.model),
            "messages": chat_messages(&request.messages),
            "stream": stream,
        });
        if stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(n) = request.max_tokens {
            body["max_completion_tokens"] = json!(n);
        }
        if let Some(effort) = request.reasoning {
            body["reasoning_effort"] = json!(effort.as_str());
        }
        if request.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(request.tools.iter().map(chat_tool).collect());
            body["tool_choice"] = json!("auto");
        }
        DriverRequest::new("/chat/completions", body)
    }

    fn build_responses(&self, request: &ChatRequest, stream: bool) -> DriverRequest {
        let mut tools: Vec<Value> = request.builtin_tools.iter().map(|t| t.to_json()).collect();
        tools.extend(request.tools.iter().map(|t| {
            json!({
                "type": "function",
                "name": t.function.name,
                "description": t.function.description,
                "parameters": t.parameters(),
            })
        }));

        let mut body = json!({
            "model": resolve_model(self.kind, &request.model),
            "input": responses_input(&request.messages),
            "tools": tools,
            "stream": stream,
        });
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(n) = request.max_tokens {
            body["max_output_tokens"] = json!(n);
        }
        if let Some(effort) = request.reasoning {
            body["reasoning"] = json!({ "effort": effort.as_str() });
        }
        if request.json_mode {
            body["text"] = json!({ "format": { "type": "json_object" } });
        }
        DriverRequest::new("/responses", body)
    }

    fn parse_responses(&self, body: &Value) -> Result<ChatResponse> {
        let items = body["output"]
            .as_array()
            .ok_or_else(|| malformed(self.kind, "no output in response"))?;

        let mut out = ResponsesOutput::default();
        let mut tool_calls = Vec::new();
        for item in items {
            match item["type"].as_str().unwrap_or_default() {
                "message" => {
                    for part in item["content"].as_array().into_iter().flatten() {
                        if part["type"] != "output_text" {
                            continue;
                        }
                        out.text.push_str(part["text"].as_str().unwrap_or_default());
                        for a in part["annotations"].as_array().into_iter().flatten() {
                            collect_annotation(a, &mut out);
                        }
                    }
                }
                "function_call" => tool_calls.push(ToolCall::new(
                    item["call_id"].as_str().unwrap_or_default(),
                    item["name"].as_str().unwrap_or_default(),
                    item["arguments"].as_str().unwrap_or("{}"),
                )),
                kind if kind.ends_with("_call") => {
                    for s in item
                        .pointer("/action/sources")
                        .and_then(|v| v.as_array())
                        .into_iter()
                        .flatten()
                    {
                        if let Some(url) = s["url"].as_str() {
                            push_source(&mut out.sources, url, s["title"].as_str());
                        }
                    }
                    out.tool_calls.push(builtin_call(kind, item));
                }
                other => debug!(item = other, "ignoring responses output item"),
            }
        }

        let usage = &body["usage"];
        let usage = Usage {
            prompt_tokens: usage["input_tokens"].as_u64().unwrap_or(0),
            completion_tokens: usage["output_tokens"].as_u64().unwrap_or(0),
            total_tokens: usage["total_tokens"].as_u64().unwrap_or(0),
        };

        Ok(ChatResponse {
            content: out.text.clone(),
            tool_calls,
            usage: with_total(usage),
            finish_reason: body["status"].as_str().map(String::from),
            responses_output: Some(out),
        })
    }
}

impl ProviderDriver for OpenAiDriver {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn capabilities(&self) -> Capabilities {
        let builtins = self.kind == ProviderKind::OpenAi;
        Capabilities {
            tools: true,
            vision: true,
            streaming: true,
            json: true,
            reasoning: true,
            pdf: true,
            web_search: builtins,
            file_search: builtins,
            code_interpreter: builtins,
            mcp: builtins,
        }
    }

    fn build_request(&self, request: &ChatRequest, stream: bool) -> Result<DriverRequest> {
        if self.uses_responses_api(request) {
            Ok(self.build_responses(request, stream))
        } else {
            Ok(self.build_chat(request, stream))
        }
    }

    fn parse_response(&self, body: &Value) -> Result<ChatResponse> {
        if let Some(err) = self.error_envelope(body) {
            return Err(envelope_error(self.kind, err));
        }
        if body.get("output").is_some() {
            self.parse_responses(body)
        } else {
            parse_chat_completion(self.kind, body)
        }
    }

    fn error_envelope(&self, body: &Value) -> Option<VendorError> {
        openai_error_envelope(body)
    }

    fn stream_format(&self, request: &ChatRequest) -> StreamFormat {
        if self.uses_responses_api(request) {
            StreamFormat::TypedSse
        } else {
            StreamFormat::Sse {
                sentinel: Some("[DONE]"),
            }
        }
    }

    fn parse_stream_line(&self, event: Option<&str>, payload: &str) -> Option<StreamLine> {
        let v: Value = serde_json::from_str(payload).ok()?;
        if let Some(err) = openai_error_envelope(&v) {
            return Some(StreamLine {
                error: Some(err),
                ..Default::default()
            });
        }
        let kind = v["type"].as_str().or(event).unwrap_or_default();
        if kind.starts_with("response.") {
            return Some(responses_stream_line(kind, &v));
        }
        Some(chat_stream_line(&v))
    }
}

/// Chat-completions body: first choice, tool calls, usage. Shared with
/// OpenRouter.
pub(crate) fn parse_chat_completion(kind: ProviderKind, body: &Value) -> Result<ChatResponse> {
    let choice = body
        .pointer("/choices/0")
        .ok_or_else(|| malformed(kind, "no response choices"))?;
    let message = &choice["message"];

    let tool_calls = message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .map(|c| {
                    ToolCall::new(
                        c["id"].as_str().unwrap_or_default(),
                        c["function"]["name"].as_str().unwrap_or_default(),
                        c["function"]["arguments"].as_str().unwrap_or("{}"),
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ChatResponse {
        content: message["content"].as_str().unwrap_or_default().to_string(),
        tool_calls,
        usage: chat_usage(&body["usage"]).unwrap_or_default(),
        finish_reason: choice["finish_reason"].as_str().map(String::from),
        responses_output: None,
    })
}

/// `{error: {message, code, type}}`; the code falls back to the type.
pub(crate) fn openai_error_envelope(body: &Value) -> Option<VendorError> {
    let err = body.get("error")?;
    if err.is_null() {
        return None;
    }
    let message = err["message"]
        .as_str()
        .map(String::from)
        .or_else(|| err.as_str().map(String::from))
        .unwrap_or_else(|| err.to_string());
    let code = code_string(&err["code"]).or_else(|| code_string(&err["type"]));
    Some((code, message))
}

/// Chat-completions usage object, when present and non-null.
pub(crate) fn chat_usage(usage: &Value) -> Option<Usage> {
    if !usage.is_object() {
        return None;
    }
    Some(with_total(Usage {
        prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
        completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
        total_tokens: usage["total_tokens"].as_u64().unwrap_or(0),
    }))
}

fn with_total(mut usage: Usage) -> Usage {
    if usage.total_tokens == 0 {
        usage.total_tokens = usage.prompt_tokens + usage.completion_tokens;
    }
    usage
}

pub(crate) fn chat_stream_line(v: &Value) -> StreamLine {
    let choice = &v["choices"][0];
    StreamLine {
        delta: choice["delta"]["content"].as_str().map(String::from),
        usage: chat_usage(&v["usage"]),
        finish_reason: choice["finish_reason"].as_str().map(String::from),
        ..Default::default()
    }
}

fn responses_stream_line(kind: &str, v: &Value) -> StreamLine {
    match kind {
        "response.output_text.delta" => StreamLine::delta(v["delta"].as_str().unwrap_or_default()),
        "response.completed" | "response.incomplete" => {
            let r = &v["response"];
            StreamLine {
                usage: Some(Usage {
                    prompt_tokens: r["usage"]["input_tokens"].as_u64().unwrap_or(0),
                    completion_tokens: r["usage"]["output_tokens"].as_u64().unwrap_or(0),
                    total_tokens: r["usage"]["total_tokens"].as_u64().unwrap_or(0),
                }),
                finish_reason: r["status"].as_str().map(String::from),
                done: true,
                ..Default::default()
            }
        }
        "response.failed" => {
            let err = &v["response"]["error"];
            StreamLine {
                error: Some((
                    code_string(&err["code"]),
                    err["message"].as_str().unwrap_or("response failed").to_string(),
                )),
                ..Default::default()
            }
        }
        _ => StreamLine::default(),
    }
}

/// Chat-completions message list. Shared with OpenRouter.
pub(crate) fn chat_messages(messages: &[Message]) -> Vec<Value> {
    messages.iter().map(chat_message).collect()
}

fn chat_message(m: &Message) -> Value {
    let mut obj = Map::new();
    obj.insert("role".into(), json!(m.role.as_str()));
    let content = match &m.content {
        MessageContent::Text(s) => json!(s),
        MessageContent::Blocks(blocks) => {
            Value::Array(blocks.iter().filter_map(chat_part).collect())
        }
    };
    match m.role {
        MessageRole::Assistant if !m.tool_calls.is_empty() => {
            let text = m.text();
            obj.insert(
                "content".into(),
                if text.is_empty() { Value::Null } else { json!(text) },
            );
            let calls: Vec<Value> = m
                .tool_calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": { "name": c.name, "arguments": c.arguments },
                    })
                })
                .collect();
            obj.insert("tool_calls".into(), Value::Array(calls));
        }
        MessageRole::Tool => {
            obj.insert("content".into(), json!(m.text()));
            if let Some(id) = &m.tool_call_id {
                obj.insert("tool_call_id".into(), json!(id));
            }
        }
        _ => {
            obj.insert("content".into(), content);
        }
    }
    Value::Object(obj)
}

fn chat_part(block: &ContentBlock) -> Option<Value> {
    match block {
        ContentBlock::Text { text } => Some(json!({ "type": "text", "text": text })),
        ContentBlock::Image { url, detail } => {
            let mut image = json!({ "url": url });
            if let Some(d) = detail {
                image["detail"] = json!(d);
            }
            Some(json!({ "type": "image_url", "image_url": image }))
        }
        ContentBlock::Document { source } => {
            let data = source.data.as_ref()?;
            Some(json!({
                "type": "file",
                "file": {
                    "filename": document_name(source),
                    "file_data": format!("data:{};base64,{}", source.mime_type, data),
                },
            }))
        }
    }
}

pub(crate) fn chat_tool(t: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": t.function.name,
            "description": t.function.description,
            "parameters": t.parameters(),
        },
    })
}

fn document_name(source: &DocumentSource) -> String {
    source.name.clone().unwrap_or_else(|| {
        let ext = source.mime_type.rsplit('/').next().unwrap_or("bin");
        format!("document.{}", ext)
    })
}

fn responses_input(messages: &[Message]) -> Vec<Value> {
    let mut input = Vec::new();
    for m in messages {
        match m.role {
            MessageRole::Tool => input.push(json!({
                "type": "function_call_output",
                "call_id": m.tool_call_id.clone().unwrap_or_default(),
                "output": m.text(),
            })),
            MessageRole::Assistant => {
                let text = m.text();
                if !text.is_empty() {
                    input.push(json!({ "role": "assistant", "content": text }));
                }
                for c in &m.tool_calls {
                    input.push(json!({
                        "type": "function_call",
                        "call_id": c.id,
                        "name": c.name,
                        "arguments": c.arguments,
                    }));
                }
            }
            MessageRole::System | MessageRole::User => {
                let content = match &m.content {
                    MessageContent::Text(s) => json!(s),
                    MessageContent::Blocks(blocks) => {
                        Value::Array(blocks.iter().filter_map(responses_part).collect())
                    }
                };
                input.push(json!({ "role": m.role.as_str(), "content": content }));
            }
        }
    }
    input
}

fn responses_part(block: &ContentBlock) -> Option<Value> {
    match block {
        ContentBlock::Text { text } => Some(json!({ "type": "input_text", "text": text })),
        ContentBlock::Image { url, detail } => Some(json!({
            "type": "input_image",
            "image_url": url,
            "detail": detail.as_deref().unwrap_or("auto"),
        })),
        ContentBlock::Document { source } => match (&source.data, &source.url) {
            (Some(data), _) => Some(json!({
                "type": "input_file",
                "filename": document_name(source),
                "file_data": format!("data:{};base64,{}", source.mime_type, data),
            })),
            (None, Some(url)) => {
                // Data URIs arrive through `url` too; re-split them.
                match parse_data_uri(url) {
                    Some((mime, payload)) => Some(json!({
                        "type": "input_file",
                        "filename": document_name(source),
                        "file_data": format!("data:{};base64,{}", mime, payload),
                    })),
                    None => Some(json!({ "type": "input_file", "file_url": url })),
                }
            }
            (None, None) => None,
        },
    }
}

fn collect_annotation(a: &Value, out: &mut ResponsesOutput) {
    let kind = a["type"].as_str().unwrap_or_default();
    let citation = Citation {
        kind: kind.to_string(),
        url: a["url"].as_str().map(String::from),
        title: a["title"].as_str().map(String::from),
        file_id: a["file_id"].as_str().map(String::from),
        filename: a["filename"].as_str().map(String::from),
        start_index: a["start_index"].as_u64().or(a["index"].as_u64()).unwrap_or(0),
        end_index: a["end_index"].as_u64().or(a["index"].as_u64()).unwrap_or(0),
    };
    if kind == "url_citation" {
        if let Some(url) = &citation.url {
            push_source(&mut out.sources, url, citation.title.as_deref());
        }
    }
    out.citations.push(citation);
}

fn push_source(sources: &mut Vec<Source>, url: &str, title: Option<&str>) {
    if sources.iter().any(|s| s.url == url) {
        return;
    }
    sources.push(Source {
        url: url.to_string(),
        title: title.map(String::from),
    });
}

fn builtin_call(kind: &str, item: &Value) -> BuiltinToolCall {
    let text = |v: &Value| match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    };
    BuiltinToolCall {
        id: item["id"].as_str().unwrap_or_default().to_string(),
        kind: kind.to_string(),
        status: item["status"].as_str().unwrap_or_default().to_string(),
        name: item["name"].as_str().map(String::from),
        server_label: item["server_label"].as_str().map(String::from),
        arguments: text(&item["arguments"]),
        output: text(&item["output"]).or_else(|| text(&item["outputs"])),
        error: text(&item["error"]),
    }
}
