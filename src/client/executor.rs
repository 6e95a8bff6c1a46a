//! The executor: rate limit → cache → retry → adapter → fallback.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::builder::ExecutorBuilder;
use super::context::ExecutionContext;
use super::preflight::warn_unsupported;
use crate::batch::{BatchConfig, BatchExecutor, BatchOutput, BatchResults};
use crate::cache::CacheKey;
use crate::drivers::ChatProvider;
use crate::error::ModelFailure;
use crate::pipeline::fallback::{fallback, FallbackSuccess};
use crate::pipeline::fan_out;
use crate::pipeline::{retry_with, RetryPolicy};
use crate::types::{ChatRequest, ChatResponse, ResponsesOutput, ToolCall};
use crate::{Error, Result};

/// What one executed call produced.
#[derive(Debug, Default)]
pub struct ExecutionOutcome {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    /// Model that answered; differs from the requested one after fallback.
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub finish_reason: Option<String>,
    pub latency: Duration,
    /// Retries summed over every model tried.
    pub retries: u32,
    /// Served from the response cache without calling the provider.
    pub cached: bool,
    pub responses_output: Option<ResponsesOutput>,
    /// Models that failed before `model` answered, in chain order.
    pub failures: Vec<ModelFailure>,
}

impl ExecutionOutcome {
    fn from_success(success: FallbackSuccess<ChatResponse>, latency: Duration) -> Self {
        let FallbackSuccess {
            value: resp,
            model,
            retries,
            failures,
        } = success;
        Self {
            content: resp.content,
            tool_calls: resp.tool_calls,
            model,
            prompt_tokens: resp.usage.prompt_tokens,
            completion_tokens: resp.usage.completion_tokens,
            total_tokens: resp.usage.total_tokens,
            finish_reason: resp.finish_reason,
            latency,
            retries,
            cached: false,
            responses_output: resp.responses_output,
            failures,
        }
    }

    fn into_batch_output(self) -> BatchOutput {
        BatchOutput {
            content: self.content,
            model: self.model,
            tokens: self.total_tokens,
        }
    }
}

/// Drives one provider under a retry policy, a fallback chain and an
/// [`ExecutionContext`].
///
/// ```rust,no_run
/// use modelmux::client::Executor;
/// use modelmux::drivers::Provider;
/// use modelmux::types::ChatRequest;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn demo() -> modelmux::Result<()> {
/// let executor = Executor::builder(Provider::openrouter()?)
///     .fallback("openai/gpt-4o-mini")
///     .build();
/// let outcome = executor
///     .execute(
///         &ChatRequest::prompt("anthropic/claude-sonnet-4.5", "Hello"),
///         &CancellationToken::new(),
///     )
///     .await?;
/// println!("{} ({} tokens)", outcome.content, outcome.total_tokens);
/// # Ok(())
/// # }
/// ```
pub struct Executor {
    provider: Arc<dyn ChatProvider>,
    retry: RetryPolicy,
    fallbacks: Vec<String>,
    context: ExecutionContext,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("provider", &self.provider.name())
            .field("retry", &self.retry)
            .field("fallbacks", &self.fallbacks)
            .field("context", &self.context)
            .finish()
    }
}

impl Executor {
    /// Executor with the default retry policy and a default context.
    pub fn new(provider: impl ChatProvider + 'static) -> Self {
        Self::builder(provider).build()
    }

    pub fn builder(provider: impl ChatProvider + 'static) -> ExecutorBuilder {
        ExecutorBuilder::new(provider)
    }

    pub(crate) fn from_parts(
        provider: Arc<dyn ChatProvider>,
        retry: RetryPolicy,
        fallbacks: Vec<String>,
        context: ExecutionContext,
    ) -> Self {
        Self {
            provider,
            retry,
            fallbacks,
            context,
        }
    }

    pub fn provider(&self) -> &dyn ChatProvider {
        self.provider.as_ref()
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn fallbacks(&self) -> &[String] {
        &self.fallbacks
    }

    /// The request's own model first, then the configured fallbacks, without repeats.
    fn model_chain(&self, primary: &str) -> Vec<String> {
        let mut chain = vec![primary.to_string()];
        for model in &self.fallbacks {
            if !chain.contains(model) {
                chain.push(model.clone());
            }
        }
        chain
    }

    /// Complete `request`, falling back through the configured models.
    pub async fn execute(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome> {
        let chain = self.model_chain(&request.model);
        self.run(request, &chain, cancel).await
    }

    /// Stream `request`, handing every text delta to `on_chunk` in arrival order.
    ///
    /// Streams are never cached. An attempt that fails before any delta
    /// reached `on_chunk` is retried and falls back like any other call. Once
    /// a delta was delivered, a failure ends the call with
    /// [`Error::StreamInterrupted`], so the delivered chunks always
    /// concatenate to the returned content.
    pub async fn execute_stream(
        &self,
        request: &ChatRequest,
        on_chunk: &mut (dyn for<'s> FnMut(&'s str) + Send),
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome> {
        let started = Instant::now();
        let chain = self.model_chain(&request.model);
        self.begin(request, true);

        let sink = Mutex::new(on_chunk);
        let sink = &sink;
        let result = fallback(&chain, |model| {
            let req = request.for_model(&model);
            async move {
                let req = &req;
                let mut spent = 0u32;
                let res = retry_with(
                    &self.retry,
                    cancel,
                    move |_| async move {
                        self.throttle(cancel).await?;
                        let mut delivered = 0usize;
                        let result = {
                            let mut forward = |delta: &str| {
                                delivered += 1;
                                let mut guard = sink.lock().unwrap_or_else(|p| p.into_inner());
                                let f: &mut (dyn for<'s> FnMut(&'s str) + Send) = &mut **guard;
                                f(delta)
                            };
                            self.provider.send_stream(req, &mut forward, cancel).await
                        };
                        result.map_err(|e| interrupted(e, delivered))
                    },
                    |attempt, err, delay| {
                        spent += 1;
                        self.note_retry(&model, attempt, err, delay);
                    },
                )
                .await;
                (res, spent)
            }
        })
        .await;

        self.finish(request, result, started, None)
    }

    async fn run(
        &self,
        request: &ChatRequest,
        chain: &[String],
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome> {
        let started = Instant::now();
        self.begin(request, false);

        let cache_key = self.cache_key(request);
        if let (Some(cache), Some(key)) = (&self.context.cache, &cache_key) {
            if let Some(content) = cache.get(key) {
                self.context.stats.record_cache_hit();
                let outcome = ExecutionOutcome {
                    content,
                    model: request.model.clone(),
                    latency: started.elapsed(),
                    cached: true,
                    ..Default::default()
                };
                self.log_outcome(request, &outcome);
                if let Some(hooks) = &self.context.hooks {
                    hooks.after_response(&outcome);
                }
                return Ok(outcome);
            }
        }

        let result = fallback(chain, |model| {
            let req = request.for_model(&model);
            async move {
                let req = &req;
                let mut spent = 0u32;
                let res = retry_with(
                    &self.retry,
                    cancel,
                    move |_| async move {
                        self.throttle(cancel).await?;
                        self.provider.send(req, cancel).await
                    },
                    |attempt, err, delay| {
                        spent += 1;
                        self.note_retry(&model, attempt, err, delay);
                    },
                )
                .await;
                (res, spent)
            }
        })
        .await;

        self.finish(request, result, started, cache_key)
    }

    fn begin(&self, request: &ChatRequest, stream: bool) {
        warn_unsupported(
            self.provider.name(),
            &self.provider.capabilities(),
            request,
            stream,
        );
        self.context.stats.record_request();
        if let Some(hooks) = &self.context.hooks {
            hooks.before_request(request);
        }
    }

    fn finish(
        &self,
        request: &ChatRequest,
        result: Result<FallbackSuccess<ChatResponse>>,
        started: Instant,
        cache_key: Option<CacheKey>,
    ) -> Result<ExecutionOutcome> {
        let success = match result {
            Ok(success) => success,
            Err(e) => {
                self.context.stats.record_error();
                if self.context.debug {
                    info!(provider = self.provider.name(), model = request.model.as_str(), error = %e, "request failed");
                } else {
                    debug!(provider = self.provider.name(), model = request.model.as_str(), error = %e, "request failed");
                }
                if let Some(hooks) = &self.context.hooks {
                    hooks.on_error(&request.model, &e);
                }
                return Err(e);
            }
        };

        let latency = started.elapsed();
        self.context
            .stats
            .record_success(&success.model, &success.value.usage, latency);
        if let (Some(cache), Some(key)) = (&self.context.cache, &cache_key) {
            if success.value.tool_calls.is_empty() {
                cache.set(key, success.value.content.clone());
            }
        }

        let outcome = ExecutionOutcome::from_success(success, latency);
        self.log_outcome(request, &outcome);
        if let Some(hooks) = &self.context.hooks {
            hooks.after_response(&outcome);
        }
        Ok(outcome)
    }

    /// Key for cacheable requests: caching on, no tools of either kind.
    fn cache_key(&self, request: &ChatRequest) -> Option<CacheKey> {
        let cacheable = request.tools.is_empty() && request.builtin_tools.is_empty();
        (cacheable && self.context.caching_enabled()).then(|| CacheKey::for_request(request))
    }

    async fn throttle(&self, cancel: &CancellationToken) -> Result<()> {
        match &self.context.rate_limiter {
            Some(limiter) => limiter.wait(cancel).await,
            None => Ok(()),
        }
    }

    fn note_retry(&self, model: &str, attempt: u32, err: &Error, delay: Duration) {
        self.context.stats.record_retry();
        if let Some(hooks) = &self.context.hooks {
            hooks.on_retry(model, attempt + 1, err, delay);
        }
    }

    fn log_outcome(&self, request: &ChatRequest, outcome: &ExecutionOutcome) {
        let provider = self.provider.name();
        let duration_ms = outcome.latency.as_millis() as u64;
        if self.context.debug {
            info!(
                provider,
                model = outcome.model.as_str(),
                messages = request.messages.len(),
                duration_ms,
                tokens = outcome.total_tokens,
                retries = outcome.retries,
                cached = outcome.cached,
                "request completed"
            );
        } else {
            debug!(
                provider,
                model = outcome.model.as_str(),
                messages = request.messages.len(),
                duration_ms,
                tokens = outcome.total_tokens,
                retries = outcome.retries,
                cached = outcome.cached,
                "request completed"
            );
        }
    }

    /// Execute independent requests under `config`; results keep submission order.
    pub async fn batch(
        &self,
        requests: Vec<ChatRequest>,
        config: BatchConfig,
        cancel: &CancellationToken,
    ) -> BatchResults {
        let jobs: Vec<_> = requests
            .into_iter()
            .map(|req| {
                let label = req.model.clone();
                let op = move |scope: CancellationToken| async move {
                    let outcome = self.execute(&req, &scope).await?;
                    Ok::<BatchOutput, Error>(outcome.into_batch_output())
                };
                (label, op)
            })
            .collect();
        BatchExecutor::new(config).execute(jobs, cancel).await
    }

    /// One model, many single-turn prompts.
    pub async fn batch_prompts<I, S>(
        &self,
        model: &str,
        prompts: I,
        config: BatchConfig,
        cancel: &CancellationToken,
    ) -> BatchResults
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let requests = prompts
            .into_iter()
            .map(|p| ChatRequest::prompt(model, p))
            .collect();
        self.batch(requests, config, cancel).await
    }

    /// One request against each of `models`. No fallback: each slot reports
    /// exactly the model it names.
    pub async fn batch_models(
        &self,
        request: &ChatRequest,
        models: &[String],
        config: BatchConfig,
        cancel: &CancellationToken,
    ) -> BatchResults {
        let jobs: Vec<_> = models
            .iter()
            .map(|model| {
                let req = request.for_model(model);
                let op = move |scope: CancellationToken| async move {
                    let chain = [req.model.clone()];
                    let outcome = self.run(&req, &chain, &scope).await?;
                    Ok::<BatchOutput, Error>(outcome.into_batch_output())
                };
                (model.clone(), op)
            })
            .collect();
        BatchExecutor::new(config).execute(jobs, cancel).await
    }

    /// Send `request` to every model at once and keep the first success.
    ///
    /// The losers are cancelled. Each contender is retried on its own but
    /// never falls back.
    pub async fn race(
        &self,
        request: &ChatRequest,
        models: &[String],
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome> {
        let (_, outcome) = fan_out::race(models, cancel, |model, scope| {
            let req = request.for_model(&model);
            async move {
                let chain = [model];
                self.run(&req, &chain, &scope).await
            }
        })
        .await?;
        Ok(outcome)
    }
}

/// Failures after part of a stream reached the caller cannot be replayed.
fn interrupted(err: Error, delivered: usize) -> Error {
    if delivered == 0 || err.is_terminal() {
        err
    } else {
        Error::StreamInterrupted {
            delivered,
            last: Box::new(err),
        }
    }
}
