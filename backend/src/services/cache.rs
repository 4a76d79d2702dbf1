//! Short-lived in-memory cache of assembled cubes.
//!
//! Entries are keyed by a SHA-256 over the archive bytes and the options that
//! change assembly, expire after a TTL, and are evicted least-recently-used
//! once `max_entries` is reached. Lookups hand out clones, so a cached value
//! is never shared with a running job.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Cache key for `archive` assembled under `options`.
///
/// `options` should be a canonical rendering (for example serialized JSON) of
/// exactly the settings that affect the assembled cube.
pub fn cache_key(archive: &[u8], options: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(archive);
    hasher.update([0u8]);
    hasher.update(options.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

struct Entry<V> {
    value: V,
    inserted: Instant,
    last_used: Instant,
}

struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    hits: u64,
    misses: u64,
}

#[derive(Clone)]
pub struct ResultCache<V> {
    inner: Arc<Mutex<Inner<V>>>,
    ttl: Duration,
    max_entries: usize,
}

impl<V: Clone> ResultCache<V> {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
            })),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let mut inner = self.inner.lock();
        let expired = inner
            .entries
            .get(key)
            .is_some_and(|e| now.saturating_duration_since(e.inserted) > self.ttl);
        if expired {
            inner.entries.remove(key);
        }
        let found = inner.entries.get_mut(key).map(|e| {
            e.last_used = now;
            e.value.clone()
        });
        match found {
            Some(_) => inner.hits += 1,
            None => inner.misses += 1,
        }
        found
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    pub fn insert_at(&self, key: impl Into<String>, value: V, now: Instant) {
        let key = key.into();
        let mut inner = self.inner.lock();
        let ttl = self.ttl;
        inner
            .entries
            .retain(|_, e| now.saturating_duration_since(e.inserted) <= ttl);
        while inner.entries.len() >= self.max_entries && !inner.entries.contains_key(&key) {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    debug!(key = %k, "evicting cached cube");
                    inner.entries.remove(&k);
                }
                None => break,
            }
        }
        inner.entries.insert(
            key,
            Entry {
                value,
                inserted: now,
                last_used: now,
            },
        );
    }

    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let n = inner.entries.len();
        inner.entries.clear();
        n
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_depends_on_bytes_and_options() {
        let a = cache_key(b"archive", "{}");
        assert_eq!(a, cache_key(b"archive", "{}"));
        assert_eq!(a.len(), 64);
        assert_ne!(a, cache_key(b"archive", r#"{"interpolate":true}"#));
        assert_ne!(a, cache_key(b"archivf", "{}"));
    }

    #[test]
    fn test_hit_miss_and_clone_isolation() {
        let cache = ResultCache::new(Duration::from_secs(60), 4);
        cache.insert("k", vec![1.0, 2.0]);
        let mut got = cache.get("k").unwrap();
        got[0] = 99.0;
        assert_eq!(cache.get("k").unwrap(), vec![1.0, 2.0]);
        assert!(cache.get("missing").is_none());
        assert_eq!(
            cache.stats(),
            CacheStats {
                entries: 1,
                hits: 2,
                misses: 1
            }
        );
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = ResultCache::new(Duration::from_secs(10), 4);
        let t0 = Instant::now();
        cache.insert_at("k", 1u32, t0);
        assert_eq!(cache.get_at("k", t0 + Duration::from_secs(5)), Some(1));
        assert_eq!(cache.get_at("k", t0 + Duration::from_secs(11)), None);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = ResultCache::new(Duration::from_secs(60), 2);
        let t0 = Instant::now();
        cache.insert_at("a", 1u32, t0);
        cache.insert_at("b", 2u32, t0 + Duration::from_secs(1));
        cache.get_at("a", t0 + Duration::from_secs(2));
        cache.insert_at("c", 3u32, t0 + Duration::from_secs(3));
        assert!(cache.get_at("b", t0 + Duration::from_secs(4)).is_none());
        assert_eq!(cache.get_at("a", t0 + Duration::from_secs(4)), Some(1));
        assert_eq!(cache.get_at("c", t0 + Duration::from_secs(4)), Some(3));
        assert_eq!(cache.clear(), 2);
    }
}
