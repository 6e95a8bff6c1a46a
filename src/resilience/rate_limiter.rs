use crate::error::{Error, ErrorContext};
use crate::Result;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterSnapshot {
    pub rps: f64,
    pub burst: f64,
    pub tokens: f64,
    /// Estimated wait time until a token is available (ms), if currently empty.
    pub estimated_wait_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterConfig {
    /// Tokens per second.
    pub rps: f64,
    /// Bucket capacity (tokens).
    pub burst: f64,
}

impl RateLimiterConfig {
    /// `rps` tokens per second with a burst of two seconds' worth (at least 1).
    pub fn from_rps(rps: f64) -> Option<Self> {
        if !rps.is_finite() || rps <= 0.0 {
            return None;
        }
        Some(Self {
            rps,
            burst: (rps * 2.0).max(1.0),
        })
    }

    /// `requests` per `interval`, capacity `requests`.
    pub fn per_interval(requests: u32, interval: Duration) -> Option<Self> {
        if requests == 0 || interval.is_zero() {
            return None;
        }
        Some(Self {
            rps: requests as f64 / interval.as_secs_f64(),
            burst: requests as f64,
        })
    }
}

#[derive(Debug)]
struct State {
    tokens: f64,
    last: Instant,
}

/// Token-bucket rate limiter shared by every outbound call.
///
/// Refill is computed lazily on each check as elapsed time × rate, capped at
/// the burst size. The bucket starts full.
#[derive(Debug)]
pub struct RateLimiter {
    cfg: RateLimiterConfig,
    state: Mutex<State>,
}

impl RateLimiter {
    /// `requests` per `interval`. Zero values are a configuration error.
    pub fn new(requests: u32, interval: Duration) -> Result<Self> {
        let cfg = RateLimiterConfig::per_interval(requests, interval).ok_or_else(|| {
            Error::configuration_with_context(
                "rate limiter needs a positive request count and interval",
                ErrorContext::new()
                    .with_field_path("rate_limiter")
                    .with_details(format!("requests={requests}, interval={interval:?}")),
            )
        })?;
        Ok(Self::from_config(cfg))
    }

    /// `rps` requests per second, bursting to `2 × rps`.
    pub fn per_second(rps: f64) -> Result<Self> {
        let cfg = RateLimiterConfig::from_rps(rps).ok_or_else(|| {
            Error::configuration_with_context(
                "rate limiter needs a positive, finite rate",
                ErrorContext::new()
                    .with_field_path("rate_limiter.rps")
                    .with_details(rps.to_string()),
            )
        })?;
        Ok(Self::from_config(cfg))
    }

    pub fn from_config(cfg: RateLimiterConfig) -> Self {
        let state = Mutex::new(State {
            tokens: cfg.burst,
            last: Instant::now(),
        });
        Self { cfg, state }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.cfg
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn refill_locked(cfg: &RateLimiterConfig, st: &mut State) {
        let now = Instant::now();
        let elapsed = now.duration_since(st.last).as_secs_f64();
        if elapsed > 0.0 {
            st.tokens = (st.tokens + elapsed * cfg.rps).min(cfg.burst);
            st.last = now;
        }
    }

    /// Refill then take one token, or report the wait until one is due.
    fn take_or_wait(&self) -> std::result::Result<(), Duration> {
        let mut st = self.lock();
        Self::refill_locked(&self.cfg, &mut st);
        if st.tokens >= 1.0 {
            st.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - st.tokens;
            Err(Duration::from_secs_f64(missing / self.cfg.rps))
        }
    }

    /// Non-blocking check-and-decrement.
    pub fn allow(&self) -> bool {
        self.take_or_wait().is_ok()
    }

    /// Wait until a token is available and take it.
    ///
    /// Returns `Error::Cancelled` if `cancel` fires first; no token is
    /// consumed in that case.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let delay = match self.take_or_wait() {
                Ok(()) => return Ok(()),
                Err(delay) => delay,
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay.max(Duration::from_millis(1))) => {}
            }
        }
    }

    pub fn snapshot(&self) -> RateLimiterSnapshot {
        let mut st = self.lock();
        Self::refill_locked(&self.cfg, &mut st);
        let estimated_wait_ms = (st.tokens < 1.0)
            .then(|| ((1.0 - st.tokens) / self.cfg.rps * 1000.0).ceil() as u64);
        RateLimiterSnapshot {
            rps: self.cfg.rps,
            burst: self.cfg.burst,
            tokens: st.tokens,
            estimated_wait_ms,
        }
    }
}
