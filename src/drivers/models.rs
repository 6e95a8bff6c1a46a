//! Model-id resolution: normalized id -> vendor wire id.

use super::ProviderKind;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Dated Anthropic snapshots for the generic family names.
static ANTHROPIC_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("claude-sonnet-4.5", "claude-sonnet-4-5-20250929"),
        ("claude-sonnet-4-5", "claude-sonnet-4-5-20250929"),
        ("claude-haiku-4.5", "claude-haiku-4-5-20251001"),
        ("claude-haiku-4-5", "claude-haiku-4-5-20251001"),
        ("claude-opus-4.5", "claude-opus-4-5-20251101"),
        ("claude-opus-4-5", "claude-opus-4-5-20251101"),
        ("claude-3.7-sonnet", "claude-3-7-sonnet-20250219"),
        ("claude-3-7-sonnet", "claude-3-7-sonnet-20250219"),
    ])
});

/// Pure, total mapping of `(vendor, normalized id)` to the on-wire model.
///
/// Unknown ids pass through (after prefix stripping for direct vendors).
pub fn resolve_model(kind: ProviderKind, model: &str) -> String {
    match kind {
        ProviderKind::OpenRouter | ProviderKind::Ollama => model.to_string(),
        ProviderKind::OpenAi | ProviderKind::Azure | ProviderKind::Gemini => {
            strip_vendor_prefix(model).to_string()
        }
        ProviderKind::Anthropic => resolve_anthropic(model),
    }
}

/// `openai/gpt-4o` -> `gpt-4o`; ids without a prefix are returned unchanged.
fn strip_vendor_prefix(model: &str) -> &str {
    model.split_once('/').map(|(_, id)| id).unwrap_or(model)
}

fn resolve_anthropic(model: &str) -> String {
    let id = strip_vendor_prefix(model);
    let id = id.split_once(':').map(|(base, _)| base).unwrap_or(id);
    match ANTHROPIC_ALIASES.get(id) {
        Some(pinned) => pinned.to_string(),
        None => id.replace('.', "-"),
    }
}
