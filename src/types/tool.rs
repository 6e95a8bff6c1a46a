//! Tool calling definitions: function tools and vendor built-in tools.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tool definition (for function calling)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String, // "function"
    pub function: FunctionDefinition,
}

impl ToolDefinition {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: Some(description.into()),
                parameters: Some(parameters),
            },
        }
    }

    /// JSON-Schema parameters, defaulting to an empty object schema.
    pub fn parameters(&self) -> Value {
        self.function
            .parameters
            .clone()
            .unwrap_or_else(|| serde_json::json!({ "type": "object", "properties": {} }))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>, // JSON Schema
}

/// Tool call (invocation from model). `arguments` is the JSON-encoded argument object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Build from structured arguments, encoding them as a JSON string.
    pub fn from_value(id: impl Into<String>, name: impl Into<String>, arguments: &Value) -> Self {
        let encoded = if arguments.is_null() {
            "{}".to_string()
        } else {
            arguments.to_string()
        };
        Self::new(id, name, encoded)
    }

    pub fn arguments_json(&self) -> crate::Result<Value> {
        Ok(serde_json::from_str(&self.arguments)?)
    }
}

/// Vendor-hosted tool kinds (Responses-style APIs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinToolKind {
    WebSearch,
    FileSearch,
    CodeInterpreter,
    Mcp,
}

impl BuiltinToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuiltinToolKind::WebSearch => "web_search",
            BuiltinToolKind::FileSearch => "file_search",
            BuiltinToolKind::CodeInterpreter => "code_interpreter",
            BuiltinToolKind::Mcp => "mcp",
        }
    }
}

/// A built-in tool declaration plus its vendor options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuiltinTool {
    pub kind: BuiltinToolKind,
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl BuiltinTool {
    pub fn new(kind: BuiltinToolKind) -> Self {
        Self {
            kind,
            options: Map::new(),
        }
    }

    pub fn web_search() -> Self {
        Self::new(BuiltinToolKind::WebSearch)
    }

    pub fn file_search<I, S>(vector_store_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<Value> = vector_store_ids
            .into_iter()
            .map(|s| Value::String(s.into()))
            .collect();
        Self::new(BuiltinToolKind::FileSearch).with_option("vector_store_ids", Value::Array(ids))
    }

    pub fn code_interpreter() -> Self {
        Self::new(BuiltinToolKind::CodeInterpreter)
            .with_option("container", serde_json::json!({ "type": "auto" }))
    }

    pub fn mcp(label: impl Into<String>, server_url: impl Into<String>) -> Self {
        Self::new(BuiltinToolKind::Mcp)
            .with_option("server_label", Value::String(label.into()))
            .with_option("server_url", Value::String(server_url.into()))
            .with_option("require_approval", Value::String("never".into()))
    }

    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    /// Wire form: `{"type": <kind>, ...options}`.
    pub fn to_json(&self) -> Value {
        let mut obj = self.options.clone();
        obj.insert("type".into(), Value::String(self.kind.as_str().into()));
        Value::Object(obj)
    }
}
