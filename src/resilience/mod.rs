//! 弹性模块：为所有出站调用提供共享的令牌桶限流器。
//!
//! # Resilience Primitives Module
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`rate_limiter`] | Token bucket shared across vendors, consulted before every call |
//!
//! ```rust
//! use modelmux::resilience::RateLimiter;
//! use std::time::Duration;
//!
//! let limiter = RateLimiter::new(10, Duration::from_secs(1)).unwrap();
//! if limiter.allow() {
//!     // Proceed with request...
//! }
//! ```

pub mod rate_limiter;

pub use rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterSnapshot};
