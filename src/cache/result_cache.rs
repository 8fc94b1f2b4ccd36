//! Bounded LRU cache with optional time-to-live.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::Serialize;

/// Counters for one cache instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub capacity: usize,
    pub evictions: u64,
    pub expired: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

struct Entry<V> {
    value: V,
    inserted: Instant,
}

struct Inner<K: Hash + Eq, V> {
    entries: LruCache<K, Entry<V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
    expired: u64,
}

/// Thread-safe LRU cache. Expired entries are dropped when looked up.
pub struct ResultCache<K: Hash + Eq, V> {
    inner: Mutex<Inner<K, V>>,
    capacity: NonZeroUsize,
    ttl: Option<Duration>,
}

impl<K: Hash + Eq, V: Clone> ResultCache<K, V> {
    /// A capacity of 0 is treated as 1.
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
                evictions: 0,
                expired: 0,
            }),
            capacity,
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub(crate) fn get_at(&self, key: &K, now: Instant) -> Option<V> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        let stale = match inner.entries.get(key) {
            Some(entry) if !self.is_expired(entry, now) => {
                inner.hits += 1;
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if stale {
            inner.entries.pop(key);
            inner.expired += 1;
        }
        inner.misses += 1;
        None
    }

    pub fn put(&self, key: K, value: V) {
        self.put_at(key, value, Instant::now());
    }

    pub(crate) fn put_at(&self, key: K, value: V, now: Instant) {
        let mut inner = self.lock();
        let replacing = inner.entries.contains(&key);
        let displaced = inner.entries.push(
            key,
            Entry {
                value,
                inserted: now,
            },
        );
        if displaced.is_some() && !replacing {
            inner.evictions += 1;
        }
    }

    /// Empties the cache and zeroes its counters.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.hits = 0;
        inner.misses = 0;
        inner.evictions = 0;
        inner.expired = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            size: inner.entries.len(),
            capacity: self.capacity.get(),
            evictions: inner.evictions,
            expired: inner.expired,
        }
    }

    fn is_expired(&self, entry: &Entry<V>, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.saturating_duration_since(entry.inserted) >= ttl)
    }
}
