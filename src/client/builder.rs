use std::sync::Arc;

use tracing::warn;

use super::context::ExecutionContext;
use super::executor::Executor;
use super::hooks::ExecutionHooks;
use crate::cache::ResponseCache;
use crate::drivers::ChatProvider;
use crate::pipeline::RetryPolicy;
use crate::resilience::{RateLimiter, RateLimiterConfig};

/// Builder for [`Executor`].
///
/// Keep this surface small: a provider, a retry policy, fallbacks, and the
/// context switches. When no rate limiter is set explicitly (directly or on
/// an injected context), `MODELMUX_RPS` enables one.
pub struct ExecutorBuilder {
    provider: Arc<dyn ChatProvider>,
    retry: RetryPolicy,
    fallbacks: Vec<String>,
    context: ExecutionContext,
}

impl ExecutorBuilder {
    pub fn new(provider: impl ChatProvider + 'static) -> Self {
        Self::from_arc(Arc::new(provider))
    }

    /// Share one provider between several executors.
    pub fn from_arc(provider: Arc<dyn ChatProvider>) -> Self {
        Self {
            provider,
            retry: RetryPolicy::default(),
            fallbacks: Vec::new(),
            context: ExecutionContext::default(),
        }
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Replace the fallback models tried after the request's own model.
    pub fn fallbacks(mut self, models: Vec<String>) -> Self {
        self.fallbacks = models;
        self
    }

    pub fn fallback(mut self, model: impl Into<String>) -> Self {
        self.fallbacks.push(model.into());
        self
    }

    /// Use an existing context (shared cache, limiter, stats).
    pub fn context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    pub fn debug(mut self, on: bool) -> Self {
        self.context.debug = on;
        self
    }

    pub fn cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.context.cache = Some(cache);
        self
    }

    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.context.rate_limiter = Some(limiter);
        self
    }

    /// Token bucket of `rps` requests per second. Non-positive values are ignored.
    pub fn rate_limit_rps(mut self, rps: f64) -> Self {
        match RateLimiterConfig::from_rps(rps) {
            Some(cfg) => self.context.rate_limiter = Some(Arc::new(RateLimiter::from_config(cfg))),
            None => warn!(rps, "ignoring invalid rate limit"),
        }
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn ExecutionHooks>) -> Self {
        self.context.hooks = Some(hooks);
        self
    }

    pub fn build(mut self) -> Executor {
        if self.context.rate_limiter.is_none() {
            self.context.rate_limiter = env_rate_limiter();
        }
        Executor::from_parts(self.provider, self.retry, self.fallbacks, self.context)
    }
}

impl Executor {
    pub fn builder_from_arc(provider: Arc<dyn ChatProvider>) -> ExecutorBuilder {
        ExecutorBuilder::from_arc(provider)
    }
}

fn env_rate_limiter() -> Option<Arc<RateLimiter>> {
    let raw = std::env::var("MODELMUX_RPS").ok()?;
    limiter_from_env_value(&raw)
}

fn limiter_from_env_value(raw: &str) -> Option<Arc<RateLimiter>> {
    let rps = raw.trim().parse::<f64>().ok();
    match rps.and_then(RateLimiterConfig::from_rps) {
        Some(cfg) => Some(Arc::new(RateLimiter::from_config(cfg))),
        None => {
            warn!(value = raw, "MODELMUX_RPS is not a positive number, rate limiting disabled");
            None
        }
    }
}
