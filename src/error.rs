use crate::transport::TransportError;
use thiserror::Error;

/// Structured error context for configuration and validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "provider.base_url")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Component that raised the error (e.g., "http_transport", "executor")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Error reported by (or on behalf of) a vendor.
///
/// `code` carries the vendor's status or error code verbatim, e.g. `"429"`,
/// `"overloaded_error"` or `"RESOURCE_EXHAUSTED"`. The rendered form is
/// `provider: [code] message`, which the retry classifier pattern-matches.
#[derive(Debug, Error)]
#[error("{}", render_provider_error(.provider, .code, .message))]
pub struct ProviderError {
    pub provider: String,
    pub code: Option<String>,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ProviderError {
    pub fn new(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            code: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_source(mut self, err: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(err));
        self
    }

    /// Vendor code parsed as an HTTP status, when it is numeric.
    pub fn status(&self) -> Option<u16> {
        self.code.as_deref().and_then(|c| c.trim().parse().ok())
    }
}

fn render_provider_error(provider: &str, code: &Option<String>, message: &str) -> String {
    match code {
        Some(code) if !code.is_empty() => format!("{}: [{}] {}", provider, code, message),
        _ => format!("{}: {}", provider, message),
    }
}

/// A model that failed before the fallback chain moved on.
#[derive(Debug)]
pub struct ModelFailure {
    pub model: String,
    pub error: Error,
}

/// Unified error type for the execution core.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Network transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("max retries ({max_retries}) exceeded after {attempts} attempts: {last}")]
    RetryExhausted {
        max_retries: u32,
        attempts: u32,
        #[source]
        last: Box<Error>,
    },

    /// A stream broke after `delivered` deltas reached the caller. Never
    /// retried and never handed to a fallback model.
    #[error("stream interrupted after {delivered} delivered chunks: {last}")]
    StreamInterrupted { delivered: usize, last: Box<Error> },

    /// Every model in a fallback chain failed. `last` is the surfaced cause,
    /// `failures` keeps the earlier models' errors in chain order.
    #[error("all {} models failed, last error: {last}", .failures.len() + 1)]
    AllModelsFailed {
        #[source]
        last: Box<Error>,
        failures: Vec<ModelFailure>,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } | Error::Validation { context, .. } => {
                Some(context)
            }
            _ => None,
        }
    }

    /// True for caller cancellation and expired deadlines, including when
    /// wrapped by retry or fallback exhaustion.
    pub fn is_cancellation(&self) -> bool {
        match self {
            Error::Cancelled | Error::DeadlineExceeded => true,
            Error::RetryExhausted { last, .. } | Error::AllModelsFailed { last, .. } => {
                last.is_cancellation()
            }
            _ => false,
        }
    }

    /// Errors that neither the retry engine nor the fallback chain may move past.
    pub fn is_terminal(&self) -> bool {
        self.is_cancellation() || matches!(self, Error::StreamInterrupted { .. })
    }

    /// Innermost vendor error, looking through retry and fallback wrappers.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Error::Provider(e) => Some(e),
            Error::RetryExhausted { last, .. }
            | Error::AllModelsFailed { last, .. }
            | Error::StreamInterrupted { last, .. } => last.provider_error(),
            _ => None,
        }
    }

    /// Earlier per-model failures of an exhausted fallback chain.
    pub fn fallback_failures(&self) -> &[ModelFailure] {
        match self {
            Error::AllModelsFailed { failures, .. } => failures,
            _ => &[],
        }
    }
}
