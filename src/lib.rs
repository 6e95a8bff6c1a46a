//! # modelmux
//!
//! 与厂商无关的对话式 LLM 执行核心：统一的适配器、重试、流式解码、降级、批处理、限流与缓存。
//!
//! Provider-agnostic execution core for chat-style LLM requests. One normalized
//! request type is translated per vendor, sent with retries, decoded from
//! whichever streaming wire shape the vendor speaks, and optionally routed
//! through a fallback chain, a rate limiter and a response cache.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use modelmux::client::Executor;
//! use modelmux::drivers::Provider;
//! use modelmux::types::ChatRequest;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> modelmux::Result<()> {
//!     let executor = Executor::new(Provider::anthropic()?);
//!     let request = ChatRequest::prompt("claude-sonnet-4.5", "Hello, how are you?");
//!
//!     let outcome = executor
//!         .execute_stream(&request, &mut |delta: &str| print!("{delta}"), &CancellationToken::new())
//!         .await?;
//!     println!("\n[{} tokens, {} retries]", outcome.total_tokens, outcome.retries);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`types`] | Normalized requests, messages, tool calls and responses |
//! | [`error`] | Error taxonomy shared by every layer |
//! | [`transport`] | Pooled HTTP transport and vendor authentication |
//! | [`drivers`] | Per-vendor wire translation and the [`drivers::Provider`] adapter |
//! | [`pipeline`] | Streaming decoder, retry engine, fallback chain, race |
//! | [`resilience`] | Token-bucket rate limiter |
//! | [`cache`] | Content-addressed response cache |
//! | [`batch`] | Bounded-concurrency batch execution |
//! | [`client`] | Execution context and the [`client::Executor`] |
//! | [`logging`] | `tracing-subscriber` setup for binaries |

pub mod batch;
pub mod cache;
pub mod client;
pub mod drivers;
pub mod logging;
pub mod pipeline;
pub mod resilience;
pub mod transport;
pub mod types;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext, ModelFailure, ProviderError};

// Re-export main types for convenience
pub use client::{ExecutionContext, ExecutionOutcome, Executor, ExecutorBuilder};
pub use drivers::{ChatProvider, Provider, ProviderConfig, ProviderKind};
pub use pipeline::RetryPolicy;
pub use types::{ChatRequest, ChatResponse, Message, MessageRole, ToolCall};
