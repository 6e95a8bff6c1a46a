//! Batch executor.

use crate::error::Error;
use crate::Result;
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::ops::Deref;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Operations allowed in flight at once (at least 1).
    pub max_concurrency: usize,
    /// Per-operation deadline, layered under the batch's own scope.
    pub timeout: Option<Duration>,
    /// Cancel every other operation on the first failure.
    pub stop_on_error: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            timeout: None,
            stop_on_error: false,
        }
    }
}

impl BatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }
}

/// What a successful batch operation produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutput {
    pub content: String,
    /// Model that actually answered (may differ from the requested one after fallback).
    pub model: String,
    pub tokens: u64,
}

/// One slot of a batch, at the position the operation was submitted.
#[derive(Debug)]
pub struct BatchResult {
    pub index: usize,
    pub content: String,
    pub error: Option<Error>,
    pub model: String,
    pub tokens: u64,
    pub latency: Duration,
}

impl BatchResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    fn failed(index: usize, model: String, error: Error, latency: Duration) -> Self {
        Self {
            index,
            content: String::new(),
            error: Some(error),
            model,
            tokens: 0,
            latency,
        }
    }
}

/// Results of a batch, one per submitted operation, in submission order.
#[derive(Debug, Default)]
pub struct BatchResults(Vec<BatchResult>);

impl BatchResults {
    pub fn into_inner(self) -> Vec<BatchResult> {
        self.0
    }

    pub fn successful(&self) -> impl Iterator<Item = &BatchResult> {
        self.0.iter().filter(|r| r.is_ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = &BatchResult> {
        self.0.iter().filter(|r| !r.is_ok())
    }

    pub fn errors(&self) -> Vec<&Error> {
        self.0.iter().filter_map(|r| r.error.as_ref()).collect()
    }

    /// Content of every slot in order; failed slots contribute `""`.
    pub fn contents(&self) -> Vec<&str> {
        self.0.iter().map(|r| r.content.as_str()).collect()
    }

    pub fn total_tokens(&self) -> u64 {
        self.0.iter().map(|r| r.tokens).sum()
    }

    pub fn total_latency(&self) -> Duration {
        self.0.iter().map(|r| r.latency).sum()
    }

    pub fn success_rate(&self) -> f64 {
        if self.0.is_empty() {
            0.0
        } else {
            self.successful().count() as f64 / self.0.len() as f64
        }
    }

    /// Contents in order, plus the first error if any slot failed.
    pub fn strings(&self) -> (Vec<String>, Option<&Error>) {
        let contents = self.0.iter().map(|r| r.content.clone()).collect();
        (contents, self.0.iter().find_map(|r| r.error.as_ref()))
    }
}

impl Deref for BatchResults {
    type Target = [BatchResult];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl IntoIterator for BatchResults {
    type Item = BatchResult;
    type IntoIter = std::vec::IntoIter<BatchResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Runs independent operations under a counting permit pool.
#[derive(Debug, Clone, Default)]
pub struct BatchExecutor {
    config: BatchConfig,
}

impl BatchExecutor {
    pub fn new(config: BatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Execute `jobs`, each a `(model label, operation)` pair.
    ///
    /// Every operation receives its own child of the batch scope, which is in
    /// turn a child of `cancel`. The returned results always have one slot
    /// per job, ordered by submission. Operations that never got a permit
    /// before the batch was cancelled hold `Error::Cancelled`.
    pub async fn execute<F, Fut>(
        &self,
        jobs: Vec<(String, F)>,
        cancel: &CancellationToken,
    ) -> BatchResults
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<BatchOutput>>,
    {
        let total = jobs.len();
        let scope = cancel.child_token();
        let permits = Semaphore::new(self.config.max_concurrency.max(1));

        let mut running: FuturesUnordered<_> = jobs
            .into_iter()
            .enumerate()
            .map(|(index, (model, op))| self.run_one(index, model, op, &scope, &permits))
            .collect();

        let mut slots: Vec<Option<BatchResult>> = (0..total).map(|_| None).collect();
        while let Some(result) = running.next().await {
            if let Some(slot) = slots.get_mut(result.index) {
                *slot = Some(result);
            }
        }

        let results: Vec<BatchResult> = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    BatchResult::failed(index, String::new(), Error::Cancelled, Duration::ZERO)
                })
            })
            .collect();
        let out = BatchResults(results);
        debug!(
            total,
            succeeded = out.successful().count(),
            "batch finished"
        );
        out
    }

    async fn run_one<F, Fut>(
        &self,
        index: usize,
        model: String,
        op: F,
        scope: &CancellationToken,
        permits: &Semaphore,
    ) -> BatchResult
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<BatchOutput>>,
    {
        let _permit = tokio::select! {
            biased;
            _ = scope.cancelled() => {
                return BatchResult::failed(index, model, Error::Cancelled, Duration::ZERO);
            }
            permit = permits.acquire() => match permit {
                Ok(p) => p,
                Err(_) => {
                    return BatchResult::failed(index, model, Error::Cancelled, Duration::ZERO);
                }
            },
        };

        let start = Instant::now();
        let op_scope = scope.child_token();
        let deadline = async {
            match self.config.timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending::<()>().await,
            }
        };

        let result = tokio::select! {
            biased;
            r = op(op_scope.clone()) => r,
            _ = deadline => {
                op_scope.cancel();
                Err(Error::DeadlineExceeded)
            }
            _ = scope.cancelled() => Err(Error::Cancelled),
        };
        let latency = start.elapsed();

        match result {
            Ok(out) => BatchResult {
                index,
                content: out.content,
                error: None,
                model: if out.model.is_empty() { model } else { out.model },
                tokens: out.tokens,
                latency,
            },
            Err(e) => {
                if self.config.stop_on_error && !scope.is_cancelled() {
                    warn!(index, model = model.as_str(), error = %e, "batch operation failed, cancelling the rest");
                    scope.cancel();
                }
                BatchResult::failed(index, model, e, latency)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    type Job = Box<
        dyn FnOnce(CancellationToken) -> futures::future::BoxFuture<'static, Result<BatchOutput>>,
    >;

    fn sleeper(ms: u64, text: &'static str) -> Job {
        Box::new(move |token: CancellationToken| {
            Box::pin(async move {
                tokio::select! {
                    _ = token.cancelled() => Err(Error::Cancelled),
                    _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(BatchOutput {
                        content: text.to_string(),
                        model: String::new(),
                        tokens: 1,
                    }),
                }
            })
        })
    }

    fn failing(ms: u64) -> Job {
        Box::new(move |_token: CancellationToken| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Err::<BatchOutput, Error>(
                    ProviderError::new("openai", "bad request").with_code("400").into(),
                )
            })
        })
    }

    fn labeled(jobs: Vec<Job>) -> Vec<(String, Job)> {
        jobs.into_iter().map(|j| ("m".to_string(), j)).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_follow_submission_order() {
        let exec = BatchExecutor::new(BatchConfig::new().with_max_concurrency(3));
        let jobs = labeled(vec![sleeper(300, "a"), sleeper(100, "b"), sleeper(200, "c")]);
        let results = exec.execute(jobs, &CancellationToken::new()).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results.contents(), vec!["a", "b", "c"]);
        for (i, r) in results.iter().enumerate() {
            assert_eq!(r.index, i);
            assert_eq!(r.model, "m");
        }
        assert_eq!(results.success_rate(), 1.0);
        assert_eq!(results.total_tokens(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let jobs: Vec<(String, _)> = (0..8)
            .map(|_| {
                let active = active.clone();
                let peak = peak.clone();
                let op = move |_t: CancellationToken| async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, Error>(BatchOutput::default())
                };
                ("m".to_string(), op)
            })
            .collect();
        let exec = BatchExecutor::new(BatchConfig::new().with_max_concurrency(2));
        let results = exec.execute(jobs, &CancellationToken::new()).await;
        assert_eq!(results.len(), 8);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_operation_timeout() {
        let exec = BatchExecutor::new(BatchConfig::new().with_timeout(Duration::from_millis(150)));
        let results = exec
            .execute(labeled(vec![sleeper(100, "fast"), sleeper(10_000, "slow")]), &CancellationToken::new())
            .await;
        assert!(results[0].is_ok());
        assert!(matches!(results[1].error, Some(Error::DeadlineExceeded)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_on_error_cancels_the_rest() {
        let exec = BatchExecutor::new(
            BatchConfig::new()
                .with_max_concurrency(2)
                .with_stop_on_error(true)
                .with_timeout(Duration::from_secs(3600)),
        );
        let jobs = labeled(vec![
            failing(10),
            sleeper(60_000, "running"),
            sleeper(10, "never started"),
            sleeper(10, "never started"),
        ]);
        let start = Instant::now();
        let results = exec.execute(jobs, &CancellationToken::new()).await;
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(results.len(), 4);
        assert!(matches!(results[0].error, Some(Error::Provider(_))));
        for r in &results[1..] {
            assert!(matches!(r.error, Some(Error::Cancelled)), "slot {} = {:?}", r.index, r.error);
        }
        let (contents, first) = results.strings();
        assert_eq!(contents.len(), 4);
        assert!(first.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_outer_cancellation_reaches_every_slot() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            trigger.cancel();
        });
        let exec = BatchExecutor::new(BatchConfig::new().with_max_concurrency(1));
        let results = exec
            .execute(labeled(vec![sleeper(1_000, "a"), sleeper(1_000, "b")]), &cancel)
            .await;
        assert_eq!(results.failed().count(), 2);
        assert!(results.errors().iter().all(|e| e.is_cancellation()));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let exec = BatchExecutor::default();
        let results = exec.execute(Vec::<(String, Job)>::new(), &CancellationToken::new()).await;
        assert!(results.is_empty());
        assert_eq!(results.success_rate(), 0.0);
    }
}
