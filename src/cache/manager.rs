//! Response cache.

use super::key::CacheKey;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Bounds for the cache. Both unset means entries live for the process
/// lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: Option<usize>,
    pub ttl: Option<Duration>,
}

impl CacheConfig {
    pub fn new() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_max_entries(mut self, n: usize) -> Self {
        self.max_entries = Some(n);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
}

impl AtomicStats {
    fn to_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
struct Entry {
    content: String,
    inserted: Instant,
}

/// Memoizes the text content of completed non-streaming calls.
///
/// One lock guards the map; it is held only for the lookup or insert.
#[derive(Debug)]
pub struct ResponseCache {
    enabled: AtomicBool,
    max_entries: Option<usize>,
    ttl: Option<Duration>,
    entries: Mutex<HashMap<String, Entry>>,
    stats: AtomicStats,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(CacheConfig::new())
    }
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            enabled: AtomicBool::new(config.enabled),
            max_entries: config.max_entries.filter(|n| *n > 0),
            ttl: config.ttl,
            entries: Mutex::new(HashMap::new()),
            stats: AtomicStats::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Toggle caching. Disabling keeps existing entries but bypasses them.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn get(&self, key: &CacheKey) -> Option<String> {
        if !self.is_enabled() {
            return None;
        }
        let mut map = self.lock();
        let expired = match (map.get(key.as_str()), self.ttl) {
            (Some(e), Some(ttl)) => e.inserted.elapsed() >= ttl,
            _ => false,
        };
        if expired {
            map.remove(key.as_str());
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
        match map.get(key.as_str()) {
            Some(e) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(e.content.clone())
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn set(&self, key: &CacheKey, content: impl Into<String>) {
        if !self.is_enabled() {
            return;
        }
        let mut map = self.lock();
        if let Some(max) = self.max_entries {
            while map.len() >= max && !map.contains_key(key.as_str()) {
                let oldest = map
                    .iter()
                    .min_by_key(|(_, e)| e.inserted)
                    .map(|(k, _)| k.clone());
                match oldest {
                    Some(k) => {
                        map.remove(&k);
                        self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                    }
                    None => break,
                }
            }
        }
        map.insert(
            key.hash.clone(),
            Entry {
                content: content.into(),
                inserted: Instant::now(),
            },
        );
        self.stats.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.to_stats()
    }
}
