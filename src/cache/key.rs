//! Cache key generation.

use crate::types::ChatRequest;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Content address of a completed request: hex SHA-256 over a canonical
/// JSON rendering of model, messages, temperature and reasoning level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub hash: String,
    pub model: String,
}

impl CacheKey {
    pub fn for_request(request: &ChatRequest) -> Self {
        // serde_json::Value objects are BTreeMap-backed, so field order is stable.
        let canonical = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "temperature": request.temperature,
            "reasoning": request.reasoning.map(|r| r.as_str()),
        });
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        let hash: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        Self {
            hash,
            model: request.model.clone(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.hash
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}
