//! Query result cache
//!
//! Capacity-bounded map from a hash of (query, params) to a cloned result.
//! Entries expire after a TTL and the least recently accessed entry is evicted
//! when a new key arrives at capacity. Every entry carries a scope tag so a
//! write can invalidate everything read for the same profile.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries
    pub capacity: usize,
    /// Entry lifetime in seconds
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            ttl_secs: 300,
        }
    }
}

impl CacheConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_secs = ttl.as_secs();
        self
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired: u64,
}

impl CacheStats {
    /// Hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Hash a query and its parameters into a cache key
pub fn cache_key(query: &str, params: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    for param in params {
        hasher.update([0u8]);
        hasher.update(param.as_bytes());
    }
    let digest = hasher.finalize();

    let mut key = String::with_capacity(64);
    for byte in digest.iter() {
        let _ = write!(key, "{byte:02x}");
    }
    key
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    scope: String,
    created_at: Instant,
    last_access: Instant,
}

#[derive(Debug)]
struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
    expired: u64,
}

/// TTL + LRU cache guarded by a single lock
#[derive(Debug)]
pub struct QueryCache<V> {
    inner: Mutex<CacheInner<V>>,
    config: CacheConfig,
}

impl<V: Clone> QueryCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
                evictions: 0,
                expired: 0,
            }),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner<V>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cached value for `(query, params)`, if present and fresh
    pub fn get(&self, query: &str, params: &[&str]) -> Option<V> {
        self.get_at(&cache_key(query, params), Instant::now())
    }

    /// Insert or overwrite the value for `(query, params)` under `scope`
    pub fn set(&self, query: &str, params: &[&str], scope: &str, value: V) {
        self.set_at(cache_key(query, params), scope, value, Instant::now());
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let ttl = self.config.ttl();
        let mut guard = self.lock();
        let inner = &mut *guard;

        let expired = match inner.entries.get_mut(key) {
            Some(entry) if now.saturating_duration_since(entry.created_at) < ttl => {
                entry.last_access = now;
                inner.hits += 1;
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            inner.entries.remove(key);
            inner.expired += 1;
        }
        inner.misses += 1;
        None
    }

    fn set_at(&self, key: String, scope: &str, value: V, now: Instant) {
        if self.config.capacity == 0 {
            return;
        }
        let mut inner = self.lock();

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.config.capacity {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                inner.entries.remove(&oldest);
                inner.evictions += 1;
            }
        }

        inner.entries.insert(
            key,
            CacheEntry {
                value,
                scope: scope.to_string(),
                created_at: now,
                last_access: now,
            },
        );
    }

    /// Drop every entry tagged with `scope`
    pub fn invalidate_scope(&self, scope: &str) -> usize {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.scope != scope);
        let removed = before - inner.entries.len();
        if removed > 0 {
            debug!(scope, removed, "Invalidated cache entries");
        }
        removed
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            capacity: self.config.capacity,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expired: inner.expired,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize, ttl_secs: u64) -> QueryCache<String> {
        QueryCache::new(CacheConfig {
            capacity,
            ttl_secs,
        })
    }

    #[test]
    fn test_key_depends_on_params() {
        assert_eq!(cache_key("q", &["a", "b"]), cache_key("q", &["a", "b"]));
        assert_ne!(cache_key("q", &["a", "b"]), cache_key("q", &["ab"]));
        assert_ne!(cache_key("q", &["a"]), cache_key("r", &["a"]));
        assert_eq!(cache_key("q", &[]).len(), 64);
    }

    #[test]
    fn test_set_then_get_hits_once() {
        let cache = cache(10, 60);
        cache.set("profile", &["u1"], "g:u1", "value".to_string());

        assert_eq!(cache.get("profile", &["u1"]), Some("value".to_string()));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn test_expired_entry_is_miss_and_evicted() {
        let cache = cache(10, 60);
        let start = Instant::now();
        let key = cache_key("profile", &["u1"]);
        cache.set_at(key.clone(), "g:u1", "value".to_string(), start);

        assert!(cache.get_at(&key, start + Duration::from_secs(59)).is_some());
        assert!(cache.get_at(&key, start + Duration::from_secs(60)).is_none());

        let stats = cache.stats();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_lru_eviction_on_overflow() {
        let cache = cache(2, 60);
        let start = Instant::now();
        let (a, b, c) = (cache_key("a", &[]), cache_key("b", &[]), cache_key("c", &[]));

        cache.set_at(a.clone(), "s", "a".into(), start);
        cache.set_at(b.clone(), "s", "b".into(), start + Duration::from_millis(1));
        // Touch `a` so `b` becomes least recently used
        cache.get_at(&a, start + Duration::from_millis(2));
        cache.set_at(c.clone(), "s", "c".into(), start + Duration::from_millis(3));

        let now = start + Duration::from_millis(4);
        assert!(cache.get_at(&a, now).is_some());
        assert!(cache.get_at(&b, now).is_none());
        assert!(cache.get_at(&c, now).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_overwrite_at_capacity_does_not_evict() {
        let cache = cache(1, 60);
        cache.set("a", &[], "s", "1".into());
        cache.set("a", &[], "s", "2".into());

        assert_eq!(cache.get("a", &[]), Some("2".to_string()));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_invalidate_scope() {
        let cache = cache(10, 60);
        cache.set("profile", &["u1"], "g:u1", "p1".into());
        cache.set("violations", &["u1"], "g:u1", "v1".into());
        cache.set("profile", &["u2"], "g:u2", "p2".into());

        assert_eq!(cache.invalidate_scope("g:u1"), 2);
        assert!(cache.get("profile", &["u1"]).is_none());
        assert_eq!(cache.get("profile", &["u2"]), Some("p2".to_string()));
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert_eq!(stats.hit_rate(), 75.0);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
