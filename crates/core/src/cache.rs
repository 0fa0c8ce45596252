//! Bounded LRU + TTL memoisation cache.
//!
//! Every detector owns one of these for its recent results. Entries leave the
//! cache when they are older than the TTL or when the cache is full and they
//! are the least recently used, whichever happens first.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// A cached value with its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<K, V> {
    /// Key the value was stored under
    pub key: K,
    /// When the value was computed
    pub computed_at: Instant,
    /// Lifetime of the value
    pub ttl: Duration,
    /// The cached value
    pub value: V,
    /// Logical clock of the last read or write, used for LRU ordering
    last_used: u64,
}

impl<K, V> CacheEntry<K, V> {
    /// Returns true if the entry is older than its TTL at `now`.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.computed_at) >= self.ttl
    }
}

/// Hit/miss/eviction counters of a cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that found nothing usable
    pub misses: u64,
    /// Entries dropped because they expired
    pub expirations: u64,
    /// Entries dropped to make room for a new one
    pub evictions: u64,
}

impl CacheStats {
    /// Fraction of lookups served from the cache, 0.0 when there were none.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Small bounded cache with per-entry TTL and least-recently-used eviction.
///
/// Capacities in this engine are tiny (tens of entries), so eviction scans
/// the map instead of maintaining an intrusive list.
#[derive(Debug, Clone)]
pub struct TtlCache<K, V> {
    entries: HashMap<K, CacheEntry<K, V>>,
    ttl: Duration,
    max_entries: usize,
    clock: u64,
    stats: CacheStats,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates an empty cache. A zero `max_entries` is raised to 1.
    #[must_use]
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        let max_entries = max_entries.max(1);
        Self {
            entries: HashMap::with_capacity(max_entries),
            ttl,
            max_entries,
            clock: 0,
            stats: CacheStats::default(),
        }
    }

    /// Looks up `key` using the current instant.
    pub fn get(&mut self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    /// Looks up `key` as of `now`, dropping the entry if it has expired.
    pub fn get_at(&mut self, key: &K, now: Instant) -> Option<V> {
        self.clock += 1;
        let clock = self.clock;

        let expired = match self.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.last_used = clock;
                self.stats.hits += 1;
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove(key);
            self.stats.expirations += 1;
        }
        self.stats.misses += 1;
        None
    }

    /// Stores `value` under `key` using the current instant.
    pub fn insert(&mut self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    /// Stores `value` under `key` as computed at `now`.
    ///
    /// Expired entries are purged first; if the cache is still full the
    /// least recently used entry is evicted.
    pub fn insert_at(&mut self, key: K, value: V, now: Instant) {
        self.clock += 1;

        if !self.entries.contains_key(&key) {
            self.purge_expired(now);
            if self.entries.len() >= self.max_entries {
                self.evict_lru();
            }
        }

        self.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                computed_at: now,
                ttl: self.ttl,
                value,
                last_used: self.clock,
            },
        );
    }

    /// Drops every entry whose TTL has elapsed at `now`.
    pub fn purge_expired(&mut self, now: Instant) {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        self.stats.expirations += (before - self.entries.len()) as u64;
    }

    /// Removes all entries. Counters are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Removes all entries and zeroes the counters.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.clock = 0;
        self.stats = CacheStats::default();
    }

    /// Number of live (possibly expired but not yet purged) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .entries
            .values()
            .min_by_key(|entry| entry.last_used)
            .map(|entry| entry.key.clone());

        if let Some(key) = oldest {
            self.entries.remove(&key);
            self.stats.evictions += 1;
        }
    }
}
