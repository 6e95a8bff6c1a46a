//! Observer hooks invoked around each execution.

use std::time::Duration;

use super::executor::ExecutionOutcome;
use crate::types::ChatRequest;
use crate::Error;

/// Callbacks the executor fires at fixed points of a call.
///
/// Every method has an empty default, so implementors override only what
/// they watch. Hooks run inline on the calling task and must not block.
pub trait ExecutionHooks: Send + Sync {
    /// Before the first outbound attempt (and before the cache lookup).
    fn before_request(&self, _request: &ChatRequest) {}

    /// After a call produced an outcome, including cache hits.
    fn after_response(&self, _outcome: &ExecutionOutcome) {}

    /// When the whole call failed, after fallback was exhausted.
    fn on_error(&self, _model: &str, _error: &Error) {}

    /// Before sleeping `delay` ahead of retry number `attempt` (1-based).
    fn on_retry(&self, _model: &str, _attempt: u32, _error: &Error, _delay: Duration) {}
}
