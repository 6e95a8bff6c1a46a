//! Retry engine
//!
//! Wraps any fallible async operation with exponential backoff, jitter and a
//! single retryability classifier. The engine knows nothing about HTTP or
//! vendors; callers hand it a closure performing one attempt.

use crate::error::Error;
use crate::Result;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Backoff and classification settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. `0` means attempt exactly once.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Fraction of the delay used as a uniform ± perturbation, in `[0, 1]`.
    pub jitter: f64,
    pub retryable_statuses: Vec<u16>,
    /// Matched case-insensitively against the rendered error.
    pub retryable_substrings: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            jitter: 0.1,
            retryable_statuses: vec![429, 500, 502, 503, 504],
            retryable_substrings: strings(&[
                "connection reset",
                "connection refused",
                "timeout",
                "temporary failure",
                "rate limit",
                "overloaded",
            ]),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl RetryPolicy {
    /// More attempts, shorter waits.
    pub fn aggressive() -> Self {
        let mut substrings = Self::default().retryable_substrings;
        substrings.push("ECONNRESET".to_string());
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 1.5,
            jitter: 0.2,
            retryable_substrings: substrings,
            ..Self::default()
        }
    }

    /// Long waits, only rate limiting and overload are retried.
    pub fn gentle() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(120),
            backoff_factor: 3.0,
            jitter: 0.15,
            retryable_statuses: vec![429, 503],
            retryable_substrings: strings(&["rate limit", "overloaded"]),
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_initial_delay(mut self, d: Duration) -> Self {
        self.initial_delay = d;
        self
    }

    pub fn with_max_delay(mut self, d: Duration) -> Self {
        self.max_delay = d;
        self
    }

    pub fn with_backoff_factor(mut self, f: f64) -> Self {
        self.backoff_factor = f;
        self
    }

    pub fn with_jitter(mut self, j: f64) -> Self {
        self.jitter = if j.is_nan() { 0.0 } else { j.clamp(0.0, 1.0) };
        self
    }

    pub fn with_retryable_statuses(mut self, statuses: Vec<u16>) -> Self {
        self.retryable_statuses = statuses;
        self
    }

    pub fn with_retryable_substring(mut self, s: impl Into<String>) -> Self {
        self.retryable_substrings.push(s.into());
        self
    }

    /// Capped exponential delay before jitter. Non-decreasing in `attempt`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let initial = self.initial_delay.as_secs_f64();
        let cap = self.max_delay.as_secs_f64();
        let exp = self.backoff_factor.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
        let secs = (initial * exp).min(cap);
        if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs)
        } else if secs.is_infinite() {
            self.max_delay
        } else {
            Duration::ZERO
        }
    }

    /// Delay to wait after failed attempt number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let spread = base.as_secs_f64() * self.jitter.min(1.0);
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((base.as_secs_f64() + offset).max(0.0))
    }

    /// The single retryability classifier.
    ///
    /// Cancellation and interrupted streams are never retried. Otherwise, in
    /// order: a transient status in bracketed or worded form within the
    /// rendered message, a transient substring (case-insensitive), a numeric
    /// vendor code in the transient set, and finally a connection-level
    /// transport failure.
    pub fn is_retryable(&self, err: &Error) -> bool {
        if err.is_terminal() {
            return false;
        }
        let rendered = render_chain(err);
        let lower = rendered.to_lowercase();

        let status_match = self.retryable_statuses.iter().any(|code| {
            [
                format!("[{}]", code),
                format!("status code {}", code),
                format!("status {}", code),
                format!("http {}", code),
            ]
            .iter()
            .any(|form| lower.contains(form.as_str()))
        });
        if status_match {
            return true;
        }

        if self
            .retryable_substrings
            .iter()
            .any(|s| !s.is_empty() && lower.contains(&s.to_lowercase()))
        {
            return true;
        }

        if let Some(status) = err.provider_error().and_then(|p| p.status()) {
            if self.retryable_statuses.contains(&status) {
                return true;
            }
        }

        is_connection_failure(err)
    }
}

fn render_chain(err: &Error) -> String {
    let mut out = err.to_string();
    let mut src = std::error::Error::source(err);
    while let Some(e) = src {
        out.push_str(": ");
        out.push_str(&e.to_string());
        src = e.source();
    }
    out
}

fn is_connection_failure(err: &Error) -> bool {
    let mut src: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = src {
        if let Some(t) = e.downcast_ref::<crate::transport::TransportError>() {
            if t.is_connection_failure() {
                return true;
            }
        }
        src = e.source();
    }
    false
}

/// Run `op` under `policy`. See [`retry_with`].
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, cancel: &CancellationToken, op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with(policy, cancel, op, |_, _, _| {}).await
}

/// Run `op` under `policy`, calling `on_retry(attempt, error, delay)` before
/// every backoff wait.
///
/// `op` receives the 0-based attempt number. A cancelled scope is checked
/// before each attempt and raced against each wait; either way the result is
/// `Error::Cancelled`. Terminal errors are returned unchanged. A transient
/// error on the last permitted attempt becomes [`Error::RetryExhausted`].
pub async fn retry_with<T, F, Fut, N>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
    mut on_retry: N,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
    N: FnMut(u32, &Error, Duration),
{
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !policy.is_retryable(&err) {
            return Err(err);
        }
        if attempt >= policy.max_retries {
            return Err(Error::RetryExhausted {
                max_retries: policy.max_retries,
                attempts: attempt + 1,
                last: Box::new(err),
            });
        }

        let delay = policy.backoff(attempt);
        debug!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retrying after transient error"
        );
        on_retry(attempt, &err, delay);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}
