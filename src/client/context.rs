//! Execution context: the process-level switches, passed in rather than global.

use std::fmt;
use std::sync::Arc;

use super::hooks::ExecutionHooks;
use super::stats::{SessionStats, StatsSnapshot};
use crate::cache::{CacheConfig, ResponseCache};
use crate::resilience::RateLimiter;

/// Everything an executor reads besides the provider and the retry policy.
///
/// Cloning is cheap and clones share the same cache, limiter and stats, so
/// several executors can be pointed at one context. A default context has
/// debug logging off, no cache, no rate limiter and no hooks.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    /// Per-request summaries at `info!` instead of `debug!`.
    pub debug: bool,
    pub cache: Option<Arc<ResponseCache>>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub stats: Arc<SessionStats>,
    pub hooks: Option<Arc<dyn ExecutionHooks>>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Attach a fresh unbounded cache.
    pub fn with_default_cache(self) -> Self {
        self.with_cache(Arc::new(ResponseCache::new(CacheConfig::new())))
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn ExecutionHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn with_stats(mut self, stats: Arc<SessionStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Whether lookups and inserts would reach a cache right now.
    pub fn caching_enabled(&self) -> bool {
        self.cache.as_ref().is_some_and(|c| c.is_enabled())
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("debug", &self.debug)
            .field("cache", &self.cache.as_ref().map(|c| c.len()))
            .field("rate_limiter", &self.rate_limiter.is_some())
            .field("hooks", &self.hooks.is_some())
            .finish()
    }
}
