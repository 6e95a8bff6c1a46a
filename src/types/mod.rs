//! 类型系统模块：定义与厂商无关的请求、消息与响应类型。
//!
//! # Types Module
//!
//! Normalized data model shared by every adapter and executor.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ChatRequest`] | Model, ordered messages, sampling and tool options |
//! | [`Message`] | Chat message with role and text or multimodal content |
//! | [`ContentBlock`] | Ordered text / image / document part |
//! | [`ToolDefinition`] | Function tool declared to the model |
//! | [`BuiltinTool`] | Vendor-hosted tool (web search, file search, ...) |
//! | [`ChatResponse`] | Text, tool calls, usage and finish reason |
//!
//! ## Example
//!
//! ```rust
//! use modelmux::types::{ChatRequest, Message, ReasoningEffort, ToolDefinition};
//!
//! let request = ChatRequest::new(
//!     "openai/gpt-4o",
//!     vec![Message::system("Be terse."), Message::user("What's the weather?")],
//! )
//! .temperature(0.2)
//! .reasoning(ReasoningEffort::Low)
//! .tool(ToolDefinition::function(
//!     "get_weather",
//!     "Get current weather for a city",
//!     serde_json::json!({"type": "object", "properties": {"city": {"type": "string"}}}),
//! ));
//! assert_eq!(request.tools.len(), 1);
//! ```

pub mod message;
pub mod request;
pub mod response;
pub mod tool;

pub use message::{ContentBlock, DocumentSource, Message, MessageContent, MessageRole};
pub use request::{ChatRequest, ReasoningEffort};
pub use response::{BuiltinToolCall, ChatResponse, Citation, ResponsesOutput, Source, Usage};
pub use tool::{BuiltinTool, BuiltinToolKind, FunctionDefinition, ToolCall, ToolDefinition};
