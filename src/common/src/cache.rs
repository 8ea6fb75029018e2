//! # Response Cache
//!
//! Per-process TTL cache for expensive read endpoints. Entries are JSON
//! values keyed by a fingerprint of the call arguments; expiry is checked
//! lazily on read.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

struct CacheEntry {
    value: serde_json::Value,
    expires_at: Instant,
}

pub struct TtlCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    default_ttl: Duration,
}

impl TtlCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl,
        }
    }

    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            None => None,
            Some(entry) if Instant::now() >= entry.expires_at => {
                entries.remove(key);
                debug!("cache expired: {}", key);
                None
            }
            Some(entry) => {
                debug!("cache hit: {}", key);
                Some(entry.value.clone())
            }
        }
    }

    pub async fn set(&self, key: impl Into<String>, value: serde_json::Value, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.into(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub async fn delete(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    /// Drop every entry whose key contains `pattern`. Used by write paths to
    /// invalidate the views they affect.
    pub async fn clear_pattern(&self, pattern: &str) {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|key, _| !key.contains(pattern));
        debug!(
            "cache cleared for pattern '{}': {} items",
            pattern,
            before - entries.len()
        );
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

/// Fingerprint of a call: SHA-256 over the canonical JSON encoding of its
/// arguments. Object keys are sorted recursively, so semantically equal
/// inputs hash identically regardless of construction order.
pub fn cache_key(prefix: &str, args: &serde_json::Value) -> String {
    let mut canonical = String::new();
    write_canonical(args, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{}:{:x}", prefix, hasher.finalize())
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_get_delete() {
        let cache = TtlCache::new(Duration::from_secs(60));

        cache.set("k", json!({"agents": 3}), None).await;
        assert_eq!(cache.get("k").await.unwrap()["agents"], 3);

        cache.delete("k").await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn entries_expire() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache
            .set("short", json!(1), Some(Duration::from_millis(10)))
            .await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get("short").await.is_none());
        // The expired entry was dropped on read
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn clear_pattern_is_substring_match() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.set("cluster:overview:abc", json!(1), None).await;
        cache.set("cluster:topology:def", json!(2), None).await;
        cache.set("agents:list:ghi", json!(3), None).await;

        cache.clear_pattern("cluster:").await;

        assert_eq!(cache.len().await, 1);
        assert!(cache.get("agents:list:ghi").await.is_some());
    }

    #[test]
    fn cache_key_is_stable_across_key_order() {
        let a = cache_key("agents", &json!({"status": "online", "health": "warning"}));
        let b = cache_key("agents", &json!({"health": "warning", "status": "online"}));
        assert_eq!(a, b);
    }

    #[test]
    fn cache_key_distinguishes_values_and_prefixes() {
        let base = cache_key("agents", &json!({"status": "online"}));
        assert_ne!(base, cache_key("agents", &json!({"status": "offline"})));
        assert_ne!(base, cache_key("alerts", &json!({"status": "online"})));
    }

    #[test]
    fn canonical_encoding_sorts_nested_objects() {
        let a = cache_key("p", &json!({"outer": {"b": 1, "a": [ {"y": 2, "x": 1} ]}}));
        let b = cache_key("p", &json!({"outer": {"a": [ {"x": 1, "y": 2} ], "b": 1}}));
        assert_eq!(a, b);
    }
}
