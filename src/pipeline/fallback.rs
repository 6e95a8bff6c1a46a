//! Fallback chain
//!
//! Tries an ordered list of models with the same request until one succeeds.

use crate::error::{Error, ModelFailure};
use crate::Result;
use std::future::Future;
use tracing::warn;

/// Result of a fallback chain that found a working model.
#[derive(Debug)]
pub struct FallbackSuccess<T> {
    pub value: T,
    /// Model that produced `value`.
    pub model: String,
    /// Retries summed over every model tried.
    pub retries: u32,
    /// Errors of the models that failed before `model`, in chain order.
    pub failures: Vec<ModelFailure>,
}

/// Run `op` against each model in order.
///
/// `op(model)` performs one fully retried call and reports the retries it
/// spent alongside its result. The first success wins. When every model
/// fails, a single-model chain returns that model's error as is; a longer
/// chain returns [`Error::AllModelsFailed`] with the last error surfaced and
/// the earlier ones kept. Cancellation and interrupted streams stop the
/// chain immediately.
pub async fn fallback<T, F, Fut>(models: &[String], mut op: F) -> Result<FallbackSuccess<T>>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = (Result<T>, u32)>,
{
    if models.is_empty() {
        return Err(Error::validation_with_context(
            "no models to try",
            crate::ErrorContext::new()
                .with_field_path("request.model")
                .with_source("fallback"),
        ));
    }

    let mut retries = 0u32;
    let mut failures: Vec<ModelFailure> = Vec::new();

    for (i, model) in models.iter().enumerate() {
        let (result, spent) = op(model.clone()).await;
        retries += spent;
        let err = match result {
            Ok(value) => {
                return Ok(FallbackSuccess {
                    value,
                    model: model.clone(),
                    retries,
                    failures,
                })
            }
            Err(e) => e,
        };

        let next = models.get(i + 1);
        if err.is_terminal() || next.is_none() {
            return Err(finish(err, failures));
        }
        warn!(
            model = model.as_str(),
            next = next.map(String::as_str).unwrap_or_default(),
            error = %err,
            "model failed, trying fallback"
        );
        failures.push(ModelFailure {
            model: model.clone(),
            error: err,
        });
    }

    // Non-empty chain: the last iteration always returns.
    Err(Error::Cancelled)
}

fn finish(last: Error, failures: Vec<ModelFailure>) -> Error {
    if failures.is_empty() {
        last
    } else {
        Error::AllModelsFailed {
            last: Box::new(last),
            failures,
        }
    }
}
