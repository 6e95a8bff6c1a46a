//! 响应缓存模块：按请求内容寻址，缓存已完成的非流式调用结果。
//!
//! # Response Caching Module
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheKey`] | SHA-256 over model, messages, temperature and reasoning level |
//! | [`ResponseCache`] | Lock-guarded map of completed text content with hit/miss stats |
//! | [`CacheConfig`] | Enable switch plus optional entry bound and TTL |
//!
//! Only the text content is stored. Tool calls and streamed responses are
//! never cached.
//!
//! ```rust
//! use modelmux::cache::{CacheConfig, CacheKey, ResponseCache};
//! use modelmux::types::ChatRequest;
//!
//! let cache = ResponseCache::new(CacheConfig::new().with_max_entries(1000));
//! let key = CacheKey::for_request(&ChatRequest::prompt("gpt-4o-mini", "Hi"));
//! cache.set(&key, "Hello!");
//! assert_eq!(cache.get(&key).as_deref(), Some("Hello!"));
//! ```

mod key;
mod manager;

pub use key::CacheKey;
pub use manager::{CacheConfig, CacheStats, ResponseCache};
