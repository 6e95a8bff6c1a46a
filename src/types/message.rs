//! Normalized chat messages with multimodal content parts.

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::tool::ToolCall;

/// Unified message structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: MessageContent,
    /// Tool calls previously issued by the assistant (assistant turns only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Id of the call this message answers (tool turns only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::with_content(MessageRole::System, MessageContent::Text(text.into()))
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_content(MessageRole::User, MessageContent::Text(text.into()))
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_content(MessageRole::Assistant, MessageContent::Text(text.into()))
    }

    /// Tool result answering the call with `tool_call_id`.
    pub fn tool(tool_call_id: impl Into<String>, text: impl Into<String>) -> Self {
        let mut msg = Self::with_content(MessageRole::Tool, MessageContent::Text(text.into()));
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    pub fn user_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self::with_content(MessageRole::User, MessageContent::Blocks(blocks))
    }

    pub fn with_content(role: MessageRole, content: MessageContent) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }

    pub fn contains_image(&self) -> bool {
        self.blocks()
            .iter()
            .any(|b| matches!(b, ContentBlock::Image { .. }))
    }

    pub fn contains_document(&self) -> bool {
        self.blocks()
            .iter()
            .any(|b| matches!(b, ContentBlock::Document { .. }))
    }

    /// Plain text of the message; multimodal parts contribute their text blocks
    /// joined by newlines.
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Blocks(bs) => bs
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    fn blocks(&self) -> &[ContentBlock] {
        match &self.content {
            MessageContent::Text(_) => &[],
            MessageContent::Blocks(bs) => bs,
        }
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }
}

/// Message content (can be string or array of content blocks)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// One ordered part of multimodal content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    /// `url` is either a remote URL or a `data:<mime>;base64,<payload>` URI.
    #[serde(rename = "image")]
    Image {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    #[serde(rename = "document")]
    Document { source: DocumentSource },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSource {
    /// Base64 payload, preferred over `url` when both are set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn image_url(url: impl Into<String>) -> Self {
        ContentBlock::Image {
            url: url.into(),
            detail: None,
        }
    }

    pub fn image_base64(data: &str, media_type: &str) -> Self {
        Self::image_url(format!("data:{};base64,{}", media_type, data))
    }

    pub fn image_from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| read_error(path, e))?;
        let media_type = guess_media_type(path).unwrap_or("image/png");
        let data = base64::engine::general_purpose::STANDARD.encode(bytes);
        Ok(Self::image_base64(&data, media_type))
    }

    pub fn document_base64(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        ContentBlock::Document {
            source: DocumentSource {
                data: Some(data.into()),
                url: None,
                mime_type: mime_type.into(),
                name: None,
            },
        }
    }

    pub fn document_url(url: impl Into<String>, mime_type: impl Into<String>) -> Self {
        ContentBlock::Document {
            source: DocumentSource {
                data: None,
                url: Some(url.into()),
                mime_type: mime_type.into(),
                name: None,
            },
        }
    }

    pub fn document_from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| read_error(path, e))?;
        let mime_type = guess_media_type(path).unwrap_or("application/octet-stream");
        let data = base64::engine::general_purpose::STANDARD.encode(bytes);
        let mut block = Self::document_base64(data, mime_type);
        if let ContentBlock::Document { source } = &mut block {
            source.name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        }
        Ok(block)
    }
}

fn read_error(path: &Path, err: std::io::Error) -> crate::Error {
    crate::Error::validation_with_context(
        format!("failed to read attachment: {}", err),
        crate::ErrorContext::new()
            .with_field_path(path.display().to_string())
            .with_source("content_block"),
    )
}

/// Split a `data:` URI into `(mime_type, base64_payload)`.
pub fn parse_data_uri(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header.split(';').next().unwrap_or("");
    Some((mime, payload))
}

fn guess_media_type(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase();
    let mt = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        _ => return None,
    };
    Some(mt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_data_uri() {
        let (mime, data) = parse_data_uri("data:image/png;base64,AAAA").unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(data, "AAAA");
        assert!(parse_data_uri("https://example.com/cat.png").is_none());
    }

    #[test]
    fn test_image_base64_builds_data_uri() {
        match ContentBlock::image_base64("QUJD", "image/jpeg") {
            ContentBlock::Image { url, .. } => assert_eq!(url, "data:image/jpeg;base64,QUJD"),
            other => panic!("unexpected block: {:?}", other),
        }
    }

    #[test]
    fn test_message_text_joins_text_blocks() {
        let msg = Message::user_blocks(vec![
            ContentBlock::text("first"),
            ContentBlock::image_url("https://example.com/a.png"),
            ContentBlock::text("second"),
        ]);
        assert_eq!(msg.text(), "first\nsecond");
        assert!(msg.contains_image());
        assert!(!msg.contains_document());
    }

    #[test]
    fn test_tool_message_carries_call_id() {
        let msg = Message::tool("call_1", "{\"ok\":true}");
        assert_eq!(msg.role, MessageRole::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_content_block_serialization_is_tagged() {
        let v = serde_json::to_value(ContentBlock::document_url("https://x/y.pdf", "application/pdf"))
            .unwrap();
        assert_eq!(v["type"], "document");
        assert_eq!(v["source"]["mime_type"], "application/pdf");
    }
}
