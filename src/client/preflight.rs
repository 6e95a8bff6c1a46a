//! Capability preflight.
//!
//! Capability tables are best effort, so a mismatch only produces a `warn!`
//! record; the request is still sent and the vendor gets the final word.

use tracing::warn;

use crate::drivers::Capabilities;
use crate::types::ChatRequest;

/// Features `request` asks for that `caps` does not declare.
pub fn unsupported_features(caps: &Capabilities, request: &ChatRequest) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if !request.tools.is_empty() && !caps.tools {
        missing.push("tools");
    }
    if request.has_images() && !caps.vision {
        missing.push("vision");
    }
    if request.has_documents() && !caps.pdf {
        missing.push("pdf");
    }
    if request.json_mode && !caps.json {
        missing.push("json");
    }
    if request.reasoning.is_some() && !caps.reasoning {
        missing.push("reasoning");
    }
    for tool in &request.builtin_tools {
        if !caps.supports_builtin(tool.kind) {
            missing.push(tool.kind.as_str());
        }
    }
    missing
}

/// Log one warning per unsupported feature. Returns how many were found.
pub(crate) fn warn_unsupported(
    provider: &str,
    caps: &Capabilities,
    request: &ChatRequest,
    stream: bool,
) -> usize {
    let mut missing = unsupported_features(caps, request);
    if stream && !caps.streaming {
        missing.push("streaming");
    }
    for feature in &missing {
        warn!(
            provider,
            model = request.model.as_str(),
            feature,
            "provider may not support requested feature"
        );
    }
    missing.len()
}
