//! 执行流水线模块：流式解码、重试、降级链与并发竞速。
//!
//! # Pipeline Layer
//!
//! Vendor-independent machinery that sits between the executor and the
//! provider adapters.
//!
//! ```text
//! Executor ── fallback ──► retry ──► adapter call ──► bytes ──► decode ──► deltas
//!                │                                                 │
//!             next model                                     on_chunk callback
//! ```
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`decode`] | Line decoder for SSE-with-sentinel, NDJSON and typed SSE streams |
//! | [`retry`] | [`RetryPolicy`], the retryability classifier and [`retry()`] |
//! | [`fallback`] | Ordered model chain keeping earlier failures |
//! | [`fan_out`] | [`race()`] of one request against several models |

pub mod decode;
pub mod fallback;
pub mod fan_out;
pub mod retry;

pub use decode::{decode_stream, estimate_tokens, LineDecoder, StreamFormat, StreamLine};
pub use fallback::{fallback, FallbackSuccess};
pub use fan_out::race;
pub use retry::{retry, retry_with, RetryPolicy};
