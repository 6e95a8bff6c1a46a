//! Provider 驱动层：厂商线路格式转换与按标签分发。
//!
//! # Drivers Module
//!
//! Each vendor gets a [`ProviderDriver`] that only translates: normalized
//! request to vendor JSON, vendor JSON (or one stream line) back to the
//! normalized shape. [`Provider`] pairs a driver with an [`HttpTransport`]
//! and owns the HTTP round trip, so the drivers stay pure and testable.
//!
//! | Driver | Vendor | Stream framing |
//! |--------|--------|----------------|
//! | [`OpenAiDriver`] | OpenAI, Azure OpenAI | SSE + `[DONE]`; typed SSE for `/responses` |
//! | [`OpenRouterDriver`] | OpenRouter | SSE + `[DONE]` |
//! | [`AnthropicDriver`] | Anthropic Messages | typed SSE |
//! | [`GeminiDriver`] | Google Gemini | SSE, no sentinel |
//! | [`OllamaDriver`] | Ollama | NDJSON with `done` |

pub mod anthropic;
pub mod gemini;
pub mod models;
pub mod ollama;
pub mod openai;
pub mod openrouter;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, ErrorContext, ProviderError};
use crate::pipeline::decode::{decode_stream, StreamFormat, StreamLine};
use crate::transport::{api_key_from_env, AuthStyle, HttpTransport, TransportConfig};
use crate::types::{BuiltinToolKind, ChatRequest, ChatResponse};
use crate::Result;

pub use anthropic::AnthropicDriver;
pub use gemini::GeminiDriver;
pub use models::resolve_model;
pub use ollama::OllamaDriver;
pub use openai::OpenAiDriver;
pub use openrouter::OpenRouterDriver;

/// Vendor error envelope as `(code, message)`.
pub type VendorError = (Option<String>, String);

/// Path (relative to the base URL) and JSON body of one vendor call.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverRequest {
    pub path: String,
    pub body: Value,
}

impl DriverRequest {
    pub fn new(path: impl Into<String>, body: Value) -> Self {
        Self {
            path: path.into(),
            body,
        }
    }
}

/// Best-effort feature table. Callers consult it before attaching features;
/// a mismatch is only ever warned about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub tools: bool,
    pub vision: bool,
    pub streaming: bool,
    pub json: bool,
    pub reasoning: bool,
    pub pdf: bool,
    pub web_search: bool,
    pub file_search: bool,
    pub code_interpreter: bool,
    pub mcp: bool,
}

impl Capabilities {
    pub fn supports_builtin(&self, kind: BuiltinToolKind) -> bool {
        match kind {
            BuiltinToolKind::WebSearch => self.web_search,
            BuiltinToolKind::FileSearch => self.file_search,
            BuiltinToolKind::CodeInterpreter => self.code_interpreter,
            BuiltinToolKind::Mcp => self.mcp,
        }
    }
}

/// Closed set of supported vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    Azure,
    OpenRouter,
    Anthropic,
    Gemini,
    Ollama,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 6] = [
        ProviderKind::OpenRouter,
        ProviderKind::OpenAi,
        ProviderKind::Azure,
        ProviderKind::Anthropic,
        ProviderKind::Gemini,
        ProviderKind::Ollama,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Azure => "azure",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Ollama => "ollama",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Some(ProviderKind::OpenAi),
            "azure" | "azure-openai" => Some(ProviderKind::Azure),
            "openrouter" => Some(ProviderKind::OpenRouter),
            "anthropic" | "claude" => Some(ProviderKind::Anthropic),
            "gemini" | "google" => Some(ProviderKind::Gemini),
            "ollama" => Some(ProviderKind::Ollama),
            _ => None,
        }
    }

    /// `None` for Azure, whose endpoint is per deployment.
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some("https://api.openai.com/v1"),
            ProviderKind::Azure => None,
            ProviderKind::OpenRouter => Some("https://openrouter.ai/api/v1"),
            ProviderKind::Anthropic => Some("https://api.anthropic.com/v1"),
            ProviderKind::Gemini => Some("https://generativelanguage.googleapis.com/v1beta"),
            ProviderKind::Ollama => Some("http://localhost:11434"),
        }
    }

    /// Environment variables consulted for the key, in order.
    pub fn api_key_vars(&self) -> &'static [&'static str] {
        match self {
            ProviderKind::OpenAi => &["OPENAI_API_KEY"],
            ProviderKind::Azure => &["AZURE_OPENAI_API_KEY", "OPENAI_API_KEY"],
            ProviderKind::OpenRouter => &["OPENROUTER_API_KEY"],
            ProviderKind::Anthropic => &["ANTHROPIC_API_KEY"],
            ProviderKind::Gemini => &["GOOGLE_API_KEY", "GEMINI_API_KEY"],
            ProviderKind::Ollama => &["OLLAMA_API_KEY"],
        }
    }

    pub fn auth_style(&self) -> AuthStyle {
        match self {
            ProviderKind::OpenAi | ProviderKind::OpenRouter | ProviderKind::Ollama => {
                AuthStyle::Bearer
            }
            ProviderKind::Azure => AuthStyle::Header("api-key"),
            ProviderKind::Anthropic => AuthStyle::Header("x-api-key"),
            ProviderKind::Gemini => AuthStyle::Query("key"),
        }
    }

    /// Local Ollama runs without a key.
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, ProviderKind::Ollama)
    }

    pub fn capabilities(&self) -> Capabilities {
        self.driver().capabilities()
    }

    fn missing_key_message(&self) -> String {
        match self {
            ProviderKind::Gemini => "GOOGLE_API_KEY or GEMINI_API_KEY not set".to_string(),
            other => format!("{} not set", other.api_key_vars()[0]),
        }
    }

    fn driver(&self) -> Box<dyn ProviderDriver> {
        match self {
            ProviderKind::OpenAi => Box::new(OpenAiDriver::new()),
            ProviderKind::Azure => Box::new(OpenAiDriver::azure()),
            ProviderKind::OpenRouter => Box::new(OpenRouterDriver::new()),
            ProviderKind::Anthropic => Box::new(AnthropicDriver::new()),
            ProviderKind::Gemini => Box::new(GeminiDriver::new()),
            ProviderKind::Ollama => Box::new(OllamaDriver::new()),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-instance overrides; unset fields fall back to vendor defaults.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
    pub headers: Vec<(String, String)>,
}

impl ProviderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Pure wire translation for one vendor.
///
/// Object safe; [`Provider`] holds it as `Box<dyn ProviderDriver>`.
pub trait ProviderDriver: Send + Sync + fmt::Debug {
    fn kind(&self) -> ProviderKind;

    fn capabilities(&self) -> Capabilities;

    /// Static headers every call carries (user headers override them).
    fn default_headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn build_request(&self, request: &ChatRequest, stream: bool) -> Result<DriverRequest>;

    /// Parse a 2xx body. Error envelopes inside it become a [`ProviderError`].
    fn parse_response(&self, body: &Value) -> Result<ChatResponse>;

    /// Recognize the vendor's error envelope.
    fn error_envelope(&self, body: &Value) -> Option<VendorError>;

    /// Convert a non-2xx response. The HTTP status is the code so the retry
    /// classifier sees it; the envelope (or raw body) becomes the message.
    fn parse_error(&self, status: u16, body: &str) -> ProviderError {
        let envelope = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| self.error_envelope(&v));
        let message = match envelope {
            Some((Some(code), message)) => format!("{}: {}", code, message),
            Some((None, message)) => message,
            None if body.trim().is_empty() => reqwest::StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("request failed")
                .to_string(),
            None => body.trim().to_string(),
        };
        ProviderError::new(self.kind().as_str(), message).with_code(status.to_string())
    }

    fn stream_format(&self, request: &ChatRequest) -> StreamFormat;

    /// Decode one stream payload. `None` means "not an envelope we know".
    fn parse_stream_line(&self, event: Option<&str>, payload: &str) -> Option<StreamLine>;
}

/// A 2xx body carrying an error envelope.
pub(crate) fn envelope_error(kind: ProviderKind, (code, message): VendorError) -> Error {
    let mut err = ProviderError::new(kind.as_str(), message);
    if let Some(code) = code {
        err = err.with_code(code);
    }
    Error::Provider(err)
}

/// Response body missing the part we need.
pub(crate) fn malformed(kind: ProviderKind, what: &str) -> Error {
    Error::Provider(ProviderError::new(kind.as_str(), what))
}

/// String or number field rendered as a string.
pub(crate) fn code_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// User headers win over driver defaults, compared case-insensitively.
fn merge_headers(
    defaults: Vec<(String, String)>,
    overrides: Vec<(String, String)>,
) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = defaults
        .into_iter()
        .filter(|(k, _)| !overrides.iter().any(|(o, _)| o.eq_ignore_ascii_case(k)))
        .collect();
    out.extend(overrides);
    out
}

/// Uniform send / send-stream / capabilities contract the executor drives.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    async fn send(&self, request: &ChatRequest, cancel: &CancellationToken)
        -> Result<ChatResponse>;

    /// `on_chunk` sees every text delta, in arrival order, before the final
    /// aggregate is returned.
    async fn send_stream(
        &self,
        request: &ChatRequest,
        on_chunk: &mut (dyn for<'s> FnMut(&'s str) + Send),
        cancel: &CancellationToken,
    ) -> Result<ChatResponse>;
}

/// A configured vendor adapter: driver + pooled HTTP transport.
#[derive(Debug)]
pub struct Provider {
    kind: ProviderKind,
    driver: Box<dyn ProviderDriver>,
    transport: HttpTransport,
}

impl Provider {
    pub fn new(kind: ProviderKind, config: ProviderConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .filter(|u| !u.trim().is_empty())
            .or_else(|| kind.default_base_url().map(String::from))
            .ok_or_else(|| {
                Error::configuration_with_context(
                    "base URL required",
                    ErrorContext::new()
                        .with_field_path("provider.base_url")
                        .with_source(kind.as_str()),
                )
            })?;
        let api_key = config
            .api_key
            .filter(|k| !k.trim().is_empty())
            .or_else(|| api_key_from_env(kind.api_key_vars()));

        let driver = kind.driver();
        let headers = merge_headers(driver.default_headers(), config.headers);
        let transport = HttpTransport::new(TransportConfig {
            provider: kind.as_str(),
            base_url,
            api_key,
            auth: kind.auth_style(),
            timeout: config.timeout,
            headers,
        })?;

        Ok(Self {
            kind,
            driver,
            transport,
        })
    }

    /// Vendor defaults, key from the environment.
    pub fn from_env(kind: ProviderKind) -> Result<Self> {
        Self::new(kind, ProviderConfig::default())
    }

    pub fn openai() -> Result<Self> {
        Self::from_env(ProviderKind::OpenAi)
    }

    pub fn azure(endpoint: impl Into<String>) -> Result<Self> {
        Self::new(
            ProviderKind::Azure,
            ProviderConfig::new().with_base_url(endpoint),
        )
    }

    pub fn openrouter() -> Result<Self> {
        Self::from_env(ProviderKind::OpenRouter)
    }

    pub fn anthropic() -> Result<Self> {
        Self::from_env(ProviderKind::Anthropic)
    }

    pub fn gemini() -> Result<Self> {
        Self::from_env(ProviderKind::Gemini)
    }

    pub fn ollama() -> Result<Self> {
        Self::from_env(ProviderKind::Ollama)
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn base_url(&self) -> &str {
        self.transport.base_url()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.driver.capabilities()
    }

    pub fn has_api_key(&self) -> bool {
        self.transport.has_api_key()
    }

    fn ensure_key(&self) -> Result<()> {
        if self.kind.requires_api_key() && !self.transport.has_api_key() {
            return Err(Error::Provider(ProviderError::new(
                self.kind.as_str(),
                self.kind.missing_key_message(),
            )));
        }
        Ok(())
    }

    async fn post(
        &self,
        request: &ChatRequest,
        stream: bool,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response> {
        self.ensure_key()?;
        let wire = self.driver.build_request(request, stream)?;
        let resp = self
            .transport
            .post_json(&wire.path, &wire.body, stream, cancel)
            .await
            .map_err(|e| self.explain_transport_failure(e))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        // Error bodies are read whole, never stream-decoded.
        let body = self.transport.read_text(resp, cancel).await?;
        warn!(
            provider = self.kind.as_str(),
            model = request.model.as_str(),
            status = status.as_u16(),
            "vendor returned an error status"
        );
        Err(Error::Provider(self.driver.parse_error(status.as_u16(), &body)))
    }

    fn explain_transport_failure(&self, err: Error) -> Error {
        match err {
            Error::Provider(mut e) if self.kind == ProviderKind::Ollama => {
                e.message = format!(
                    "{} (is Ollama running at {}?)",
                    e.message,
                    self.transport.base_url()
                );
                Error::Provider(e)
            }
            other => other,
        }
    }

    pub async fn send(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse> {
        let resp = self.post(request, false, cancel).await?;
        let text = self.transport.read_text(resp, cancel).await?;
        let body: Value = serde_json::from_str(&text).map_err(|e| {
            Error::Provider(
                ProviderError::new(self.kind.as_str(), "invalid JSON response").with_source(e),
            )
        })?;
        let response = self.driver.parse_response(&body)?;
        debug!(
            provider = self.kind.as_str(),
            model = request.model.as_str(),
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            "response parsed"
        );
        Ok(response)
    }

    pub async fn send_stream(
        &self,
        request: &ChatRequest,
        on_chunk: &mut (dyn for<'s> FnMut(&'s str) + Send),
        cancel: &CancellationToken,
    ) -> Result<ChatResponse> {
        let resp = self.post(request, true, cancel).await?;
        let bytes = Box::pin(
            resp.bytes_stream()
                .map(|r| r.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))),
        );
        let driver = self.driver.as_ref();
        decode_stream(
            self.kind.as_str(),
            driver.stream_format(request),
            |event, payload| driver.parse_stream_line(event, payload),
            bytes,
            on_chunk,
            cancel,
        )
        .await
    }
}

#[async_trait]
impl ChatProvider for Provider {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    fn capabilities(&self) -> Capabilities {
        self.driver.capabilities()
    }

    async fn send(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse> {
        Provider::send(self, request, cancel).await
    }

    async fn send_stream(
        &self,
        request: &ChatRequest,
        on_chunk: &mut (dyn for<'s> FnMut(&'s str) + Send),
        cancel: &CancellationToken,
    ) -> Result<ChatResponse> {
        Provider::send_stream(self, request, on_chunk, cancel).await
    }
}
