//! Fan-out race: the same request against several models at once.

use crate::error::Error;
use crate::Result;
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Run `op` for every model concurrently; the first success wins.
///
/// Each call gets a child of `cancel`. Once a winner is found the remaining
/// children are cancelled and their futures dropped. If every model fails the
/// last error to arrive is returned.
pub async fn race<T, F, Fut>(
    models: &[String],
    cancel: &CancellationToken,
    op: F,
) -> Result<(String, T)>
where
    F: Fn(String, CancellationToken) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if models.is_empty() {
        return Err(Error::validation_with_context(
            "no models to race",
            crate::ErrorContext::new()
                .with_field_path("request.model")
                .with_source("race"),
        ));
    }

    let scope = cancel.child_token();
    let mut pending: FuturesUnordered<_> = models
        .iter()
        .map(|model| {
            let fut = op(model.clone(), scope.child_token());
            let model = model.clone();
            async move { (model, fut.await) }
        })
        .collect();

    let mut last = None;
    while let Some((model, result)) = pending.next().await {
        match result {
            Ok(value) => {
                debug!(model = model.as_str(), "race won");
                scope.cancel();
                return Ok((model, value));
            }
            Err(e) => last = Some(e),
        }
    }
    Err(last.unwrap_or(Error::Cancelled))
}
