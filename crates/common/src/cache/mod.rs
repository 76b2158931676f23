//! In-process query cache
//!
//! Provides:
//! - Bounded storage with least-recently-used eviction
//! - Lazy time-to-live expiry, checked on lookup
//! - Deterministic keys from the normalized question and source filter
//! - Lifetime hit/miss statistics
//!
//! The map, the recency list and the counters sit behind one mutex, so every
//! operation is atomic with respect to the others. No I/O happens while the
//! lock is held.

use crate::config::CacheConfig;
use crate::metrics;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

pub use keys::CacheKey;

/// Point-in-time cache statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses) * 100`, two decimals, 0 before any lookup
    pub hit_rate_percent: f64,
    pub ttl_secs: u64,
    pub ttl_hours: f64,
}

struct Node<V> {
    key: CacheKey,
    value: V,
    inserted_at: Instant,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Hash map over a slab of list nodes; `head` is most recent, `tail` least
struct Inner<V> {
    map: HashMap<CacheKey, usize>,
    slots: Vec<Option<Node<V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    hits: u64,
    misses: u64,
}

impl<V> Inner<V> {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            hits: 0,
            misses: 0,
        }
    }

    fn node(&self, idx: usize) -> &Node<V> {
        self.slots[idx].as_ref().expect("linked slot is occupied")
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node<V> {
        self.slots[idx].as_mut().expect("linked slot is occupied")
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.node(idx);
            (node.prev, node.next)
        };

        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }

        let node = self.node_mut(idx);
        node.prev = None;
        node.next = None;
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let node = self.node_mut(idx);
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            self.node_mut(h).prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn touch(&mut self, idx: usize) {
        if self.head != Some(idx) {
            self.detach(idx);
            self.push_front(idx);
        }
    }

    fn insert(&mut self, key: CacheKey, value: V, now: Instant) {
        let node = Node {
            key: key.clone(),
            value,
            inserted_at: now,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.map.insert(key, idx);
        self.push_front(idx);
    }

    fn remove(&mut self, idx: usize) -> Node<V> {
        self.detach(idx);
        let node = self.slots[idx].take().expect("linked slot is occupied");
        self.map.remove(&node.key);
        self.free.push(idx);
        node
    }

    fn clear(&mut self) -> usize {
        let removed = self.map.len();
        self.map.clear();
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        removed
    }
}

/// Bounded, thread-safe LRU cache with lazy TTL expiry
///
/// Values are cloned out on every hit; callers never hold references into
/// the cache.
pub struct QueryCache<V> {
    inner: Mutex<Inner<V>>,
    max_size: usize,
    ttl: Duration,
}

impl<V: Clone> QueryCache<V> {
    /// Create a cache holding at most `max_size` entries (at least one)
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
            max_size: max_size.max(1),
            ttl,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_size, config.ttl())
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        // A panic mid-operation cannot leave the list half-linked for long
        // enough to matter; keep serving rather than poisoning every caller.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_expired(&self, inserted_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(inserted_at) > self.ttl
    }

    /// Look up a cached value
    pub fn get(&self, query: &str, filter: &[String]) -> Option<V> {
        self.get_at(query, filter, Instant::now())
    }

    /// Look up a cached value as of `now`
    pub fn get_at(&self, query: &str, filter: &[String], now: Instant) -> Option<V> {
        let key = keys::fingerprint(query, filter);
        let mut inner = self.lock();

        let Some(idx) = inner.map.get(&key).copied() else {
            inner.misses += 1;
            drop(inner);
            metrics::record_cache(false);
            debug!(key = %key.short(), "Cache miss");
            return None;
        };

        if self.is_expired(inner.node(idx).inserted_at, now) {
            inner.remove(idx);
            inner.misses += 1;
            drop(inner);
            metrics::record_cache(false);
            metrics::record_cache_eviction("expired");
            debug!(key = %key.short(), "Cache entry expired");
            return None;
        }

        inner.touch(idx);
        inner.hits += 1;
        let value = inner.node(idx).value.clone();
        drop(inner);

        metrics::record_cache(true);
        debug!(key = %key.short(), "Cache hit");
        Some(value)
    }

    /// Store a value, evicting the least recently used entry when full
    pub fn set(&self, query: &str, filter: &[String], value: V) {
        self.set_at(query, filter, value, Instant::now())
    }

    /// Store a value as of `now`
    pub fn set_at(&self, query: &str, filter: &[String], value: V, now: Instant) {
        let key = keys::fingerprint(query, filter);
        let mut inner = self.lock();

        if let Some(idx) = inner.map.get(&key).copied() {
            {
                let node = inner.node_mut(idx);
                node.value = value;
                node.inserted_at = now;
            }
            inner.touch(idx);
            debug!(key = %key.short(), "Cache entry refreshed");
            return;
        }

        let mut evicted = None;
        if inner.map.len() >= self.max_size {
            if let Some(tail) = inner.tail {
                let node = inner.remove(tail);
                evicted = Some(if self.is_expired(node.inserted_at, now) {
                    "expired"
                } else {
                    "capacity"
                });
            }
        }

        inner.insert(key.clone(), value, now);
        let size = inner.map.len();
        drop(inner);

        if let Some(reason) = evicted {
            metrics::record_cache_eviction(reason);
            debug!(reason, "Cache entry evicted");
        }
        debug!(key = %key.short(), size, "Cache set");
    }

    /// Remove one entry (`Some(query)`) or everything (`None`); returns the number removed
    ///
    /// Hit and miss counters survive either form.
    pub fn invalidate(&self, query: Option<&str>, filter: &[String]) -> usize {
        match query {
            Some(query) => {
                let key = keys::fingerprint(query, filter);
                let mut inner = self.lock();
                match inner.map.get(&key).copied() {
                    Some(idx) => {
                        inner.remove(idx);
                        1
                    }
                    None => 0,
                }
            }
            None => self.clear(),
        }
    }

    /// Drop every entry; returns the number removed
    pub fn clear(&self) -> usize {
        let removed = self.lock().clear();
        debug!(removed, "Cache cleared");
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let total = inner.hits + inner.misses;
        let hit_rate_percent = if total == 0 {
            0.0
        } else {
            (inner.hits as f64 / total as f64 * 100.0 * 100.0).round() / 100.0
        };

        CacheStats {
            size: inner.map.len(),
            max_size: self.max_size,
            hits: inner.hits,
            misses: inner.misses,
            hit_rate_percent,
            ttl_secs: self.ttl.as_secs(),
            ttl_hours: self.ttl.as_secs_f64() / 3600.0,
        }
    }
}

/// Cache key builder helpers
pub mod keys {
    use sha2::{Digest, Sha256};
    use std::fmt;

    /// SHA-256 fingerprint of a normalized question and sorted filter, hex encoded
    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    pub struct CacheKey(String);

    impl CacheKey {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        /// Leading characters, enough to correlate log lines
        pub fn short(&self) -> &str {
            &self.0[..12]
        }
    }

    impl fmt::Display for CacheKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    /// Case-fold, trim and collapse internal whitespace
    pub fn normalize_query(query: &str) -> String {
        query
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Build the cache key for a question and source filter
    ///
    /// The filter is sorted first so its order never changes the key.
    pub fn fingerprint(query: &str, filter: &[String]) -> CacheKey {
        let mut sorted: Vec<&str> = filter.iter().map(String::as_str).collect();
        sorted.sort_unstable();

        let mut hasher = Sha256::new();
        hasher.update(normalize_query(query).as_bytes());
        hasher.update(b":");
        for (i, source) in sorted.iter().enumerate() {
            if i > 0 {
                hasher.update(b"\x1f");
            }
            hasher.update(source.as_bytes());
        }

        CacheKey(hex::encode(hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const HOUR: Duration = Duration::from_secs(3600);

    fn no_filter() -> Vec<String> {
        Vec::new()
    }

    #[test]
    fn test_normalization_idempotent() {
        for q in ["  Headache   With Fear  ", "ARNICA\tafter\nfalls", "", "already normal"] {
            let once = keys::normalize_query(q);
            assert_eq!(keys::normalize_query(&once), once);
        }
        assert_eq!(keys::normalize_query("  Headache   With Fear  "), "headache with fear");
    }

    #[test]
    fn test_fingerprint_normalizes_question() {
        let a = keys::fingerprint("  Headache   With Fear  ", &[]);
        let b = keys::fingerprint("headache with fear", &[]);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_fingerprint_filter_order_independent() {
        let ab = vec!["BookA".to_string(), "BookB".to_string()];
        let ba = vec!["BookB".to_string(), "BookA".to_string()];
        assert_eq!(keys::fingerprint("fever", &ab), keys::fingerprint("fever", &ba));
        assert_ne!(keys::fingerprint("fever", &ab), keys::fingerprint("fever", &[]));
        assert_ne!(
            keys::fingerprint("fever", &["BookA".to_string()]),
            keys::fingerprint("fever", &ab)
        );
    }

    #[test]
    fn test_lru_scenario() {
        let cache = QueryCache::new(2, HOUR);
        let t0 = Instant::now();
        let f = no_filter();

        cache.set_at("k1", &f, 1, t0);
        cache.set_at("k2", &f, 2, t0);
        cache.set_at("k3", &f, 3, t0);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_at("k2", &f, t0), Some(2));
        assert_eq!(cache.stats().hits, 1);

        cache.set_at("k4", &f, 4, t0);
        assert_eq!(cache.get_at("k1", &f, t0), None);
        assert_eq!(cache.get_at("k3", &f, t0), None);
        assert_eq!(cache.get_at("k2", &f, t0), Some(2));
        assert_eq!(cache.get_at("k4", &f, t0), Some(4));
    }

    #[test]
    fn test_ttl_boundary() {
        let cache = QueryCache::new(10, HOUR);
        let t0 = Instant::now();
        let f = no_filter();
        let eps = Duration::from_millis(1);

        cache.set_at("q", &f, "answer", t0);
        assert_eq!(cache.get_at("q", &f, t0 + HOUR - eps), Some("answer"));
        assert_eq!(cache.get_at("q", &f, t0 + HOUR), Some("answer"));
        assert_eq!(cache.get_at("q", &f, t0 + HOUR + eps), None);

        // Expired entry is physically removed on lookup
        assert_eq!(cache.len(), 0);
        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_overwrite_refreshes_timestamp() {
        let cache = QueryCache::new(10, HOUR);
        let t0 = Instant::now();
        let f = no_filter();

        cache.set_at("q", &f, 1, t0);
        cache.set_at("q", &f, 2, t0 + HOUR);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_at("q", &f, t0 + HOUR + HOUR / 2), Some(2));
    }

    #[test]
    fn test_bounded_size_evicts_exactly_one() {
        let cache = QueryCache::new(5, HOUR);
        let t0 = Instant::now();
        let f = no_filter();

        for i in 0..5 {
            cache.set_at(&format!("q{}", i), &f, i, t0);
        }
        assert_eq!(cache.len(), 5);

        cache.set_at("q5", &f, 5, t0);
        assert_eq!(cache.len(), 5);
        assert_eq!(cache.get_at("q0", &f, t0), None);
        for i in 1..=5 {
            assert_eq!(cache.get_at(&format!("q{}", i), &f, t0), Some(i));
        }

        for i in 0..100 {
            cache.set_at(&format!("bulk{}", i), &f, i, t0);
            assert!(cache.len() <= 5);
        }
    }

    #[test]
    fn test_hit_protects_from_eviction() {
        let cache = QueryCache::new(3, HOUR);
        let t0 = Instant::now();
        let f = no_filter();

        cache.set_at("a", &f, 'a', t0);
        cache.set_at("b", &f, 'b', t0);
        cache.set_at("c", &f, 'c', t0);
        assert!(cache.get_at("a", &f, t0).is_some());

        cache.set_at("d", &f, 'd', t0);
        cache.set_at("e", &f, 'e', t0);

        // b and c were untouched since before the hit on a
        assert_eq!(cache.get_at("b", &f, t0), None);
        assert_eq!(cache.get_at("c", &f, t0), None);
        assert_eq!(cache.get_at("a", &f, t0), Some('a'));
    }

    #[test]
    fn test_invalidate_single_and_all() {
        let cache = QueryCache::new(10, HOUR);
        let books = vec!["BookA".to_string()];

        cache.set("fever", &books, 1);
        cache.set("chill", &[], 2);
        assert_eq!(cache.get("Fever ", &books), Some(1));

        assert_eq!(cache.invalidate(Some("fever"), &[]), 0);
        assert_eq!(cache.invalidate(Some("FEVER"), &books), 1);
        assert_eq!(cache.get("fever", &books), None);
        assert_eq!(cache.len(), 1);

        assert_eq!(cache.invalidate(None, &[]), 1);
        assert!(cache.is_empty());

        // Counters describe lifetime behaviour and survive a clear
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_stats_snapshot() {
        let cache: QueryCache<u8> = QueryCache::new(1000, Duration::from_secs(86_400));
        let stats = cache.stats();
        assert_eq!(stats.hit_rate_percent, 0.0);
        assert_eq!(stats.max_size, 1000);
        assert_eq!(stats.ttl_hours, 24.0);

        cache.set("a", &[], 1);
        cache.get("a", &[]);
        cache.get("b", &[]);
        cache.get("c", &[]);
        assert_eq!(cache.stats().hit_rate_percent, 33.33);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let cache = QueryCache::new(0, HOUR);
        cache.set("a", &[], 1);
        cache.set("b", &[], 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("b", &[]), Some(2));
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(QueryCache::new(50, HOUR));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        let key = format!("q{}", (t * 31 + i) % 120);
                        if cache.get(&key, &[]).is_none() {
                            cache.set(&key, &[], i);
                        }
                        if i % 97 == 0 {
                            cache.invalidate(Some(&key), &[]);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = cache.stats();
        assert!(stats.size <= 50);
        assert_eq!(stats.hits + stats.misses, 8 * 500);
    }
}
