use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

struct CachedValue {
    data: Value,
    cached_at: DateTime<Utc>,
}

/// TTL-bounded in-memory map keyed by (chain, token), protected by a
/// single mutex so map access is always serialized (no lock-striping,
/// per the concurrency model).
pub struct PriceCache {
    ttl_seconds: i64,
    entries: Mutex<HashMap<(String, String), CachedValue>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
}

impl PriceCache {
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            ttl_seconds,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn key(chain: &str, token_address: &str) -> (String, String) {
        (chain.to_lowercase(), token_address.to_lowercase())
    }

    pub async fn get(&self, chain: &str, token_address: &str) -> Option<Value> {
        let key = Self::key(chain, token_address);
        let mut entries = self.entries.lock().await;

        match entries.get(&key) {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(cached) => {
                let age = Utc::now() - cached.cached_at;
                if age.num_seconds() > self.ttl_seconds {
                    entries.remove(&key);
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    None
                } else {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    Some(cached.data.clone())
                }
            }
        }
    }

    pub async fn set(&self, chain: &str, token_address: &str, data: Value) {
        let key = Self::key(chain, token_address);
        let mut entries = self.entries.lock().await;
        entries.insert(
            key,
            CachedValue {
                data,
                cached_at: Utc::now(),
            },
        );
    }

    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let count = entries.len();
        entries.clear();
        count
    }

    pub async fn cleanup_expired(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let now = Utc::now();
        let ttl = self.ttl_seconds;
        let before = entries.len();
        entries.retain(|_, cached| (now - cached.cached_at).num_seconds() <= ttl);
        before - entries.len()
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.lock().await.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn get_after_set_returns_value() {
        let cache = PriceCache::new(30);
        cache.set("Solana", "Abc123", json!({"priceUsd": 1.5})).await;
        let value = cache.get("solana", "abc123").await;
        assert_eq!(value, Some(json!({"priceUsd": 1.5})));
    }

    #[tokio::test]
    async fn expires_after_ttl() {
        let cache = PriceCache::new(0);
        cache.set("solana", "abc", json!(1)).await;
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(cache.get("solana", "abc").await, None);
    }

    #[tokio::test]
    async fn miss_then_hit_counters() {
        let cache = PriceCache::new(30);
        assert!(cache.get("solana", "x").await.is_none());
        cache.set("solana", "x", json!(1)).await;
        assert!(cache.get("solana", "x").await.is_some());
        let stats = cache.stats().await;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn clear_reports_removed_count() {
        let cache = PriceCache::new(30);
        cache.set("solana", "a", json!(1)).await;
        cache.set("solana", "b", json!(2)).await;
        assert_eq!(cache.clear().await, 2);
        assert_eq!(cache.len().await, 0);
    }
}
