//! Session statistics accumulated by the executor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::types::Usage;

/// Per-model counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelUsage {
    pub requests: u64,
    pub tokens: u64,
}

/// A point-in-time copy of [`SessionStats`].
///
/// Facts only; callers compute whatever ratios they care about.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub errors: u64,
    pub retries: u64,
    pub cache_hits: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub total_latency: Duration,
    pub per_model: HashMap<String, ModelUsage>,
}

impl StatsSnapshot {
    /// Mean latency of completed (successful) requests.
    pub fn average_latency(&self) -> Duration {
        let completed = self.requests.saturating_sub(self.errors + self.cache_hits);
        if completed == 0 {
            return Duration::ZERO;
        }
        self.total_latency / completed as u32
    }

    pub fn error_rate(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        self.errors as f64 / self.requests as f64
    }
}

/// Counters shared by every call made through one execution context.
///
/// Scalar counters are lock-free; the per-model map sits behind a mutex held
/// only for the insert.
#[derive(Debug, Default)]
pub struct SessionStats {
    requests: AtomicU64,
    errors: AtomicU64,
    retries: AtomicU64,
    cache_hits: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    total_tokens: AtomicU64,
    latency_us: AtomicU64,
    per_model: Mutex<HashMap<String, ModelUsage>>,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Account a completed call against `model`.
    pub fn record_success(&self, model: &str, usage: &Usage, latency: Duration) {
        self.prompt_tokens
            .fetch_add(usage.prompt_tokens, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(usage.completion_tokens, Ordering::Relaxed);
        self.total_tokens
            .fetch_add(usage.total_tokens, Ordering::Relaxed);
        self.latency_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);

        let mut map = self.per_model.lock().unwrap_or_else(|p| p.into_inner());
        let entry = map.entry(model.to_string()).or_default();
        entry.requests += 1;
        entry.tokens += usage.total_tokens;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let per_model = self
            .per_model
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
            total_tokens: self.total_tokens.load(Ordering::Relaxed),
            total_latency: Duration::from_micros(self.latency_us.load(Ordering::Relaxed)),
            per_model,
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.requests,
            &self.errors,
            &self.retries,
            &self.cache_hits,
            &self.prompt_tokens,
            &self.completion_tokens,
            &self.total_tokens,
            &self.latency_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.per_model
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }
}
