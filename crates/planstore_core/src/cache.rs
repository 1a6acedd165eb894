//! In-memory read-through cache in front of an index.
//!
//! Eviction on capacity is by insertion order: the entry that was inserted
//! first goes first, regardless of how recently it was read. This is not an
//! LRU.

use crate::config::{CacheConfig, CacheInvalidation};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::debug;

/// One cached value.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    cached_at: Instant,
    version: u64,
}

/// Hit/miss counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that fell through.
    pub misses: u64,
    /// Entries dropped by capacity or expiry.
    pub evictions: u64,
}

/// Bounded cache keyed by entity id.
#[derive(Debug)]
pub struct EntityCache<V> {
    config: CacheConfig,
    entries: HashMap<String, CacheEntry<V>>,
    insertion_order: VecDeque<String>,
    stats: CacheStats,
}

impl<V: Clone> EntityCache<V> {
    /// Creates an empty cache with the given policy.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            insertion_order: VecDeque::new(),
            stats: CacheStats::default(),
        }
    }

    /// Looks up `id`.
    ///
    /// In `version` invalidation mode, pass the version the caller considers
    /// current; a cached entry with any other version is a miss.
    pub fn get(&mut self, id: &str, current_version: Option<u64>) -> Option<V> {
        if !self.config.enabled {
            return None;
        }

        let stale = match self.entries.get(id) {
            None => {
                self.stats.misses += 1;
                return None;
            }
            Some(entry) => match self.config.invalidation {
                CacheInvalidation::Ttl => {
                    entry.cached_at.elapsed() >= Duration::from_millis(self.config.ttl_ms)
                }
                CacheInvalidation::Version => {
                    current_version.is_some_and(|v| v != entry.version)
                }
            },
        };

        if stale {
            self.remove(id);
            self.stats.evictions += 1;
            self.stats.misses += 1;
            return None;
        }

        self.stats.hits += 1;
        self.entries.get(id).map(|e| e.value.clone())
    }

    /// Inserts or replaces `id`.
    ///
    /// Replacing keeps the key's original insertion position.
    pub fn insert(&mut self, id: &str, value: V, version: u64) {
        if !self.config.enabled || self.config.max_size == 0 {
            return;
        }

        let entry = CacheEntry {
            value,
            cached_at: Instant::now(),
            version,
        };

        if let Some(existing) = self.entries.get_mut(id) {
            *existing = entry;
            return;
        }

        while self.entries.len() >= self.config.max_size {
            let Some(oldest) = self.insertion_order.pop_front() else {
                break;
            };
            if self.entries.remove(&oldest).is_some() {
                self.stats.evictions += 1;
                debug!(id = %oldest, "cache full, evicted earliest insertion");
            }
        }

        self.insertion_order.push_back(id.to_string());
        self.entries.insert(id.to_string(), entry);
    }

    /// Drops `id` from the cache.
    pub fn invalidate(&mut self, id: &str) {
        self.remove(id);
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.insertion_order.clear();
    }

    /// Returns true if `id` is cached (regardless of staleness).
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn remove(&mut self, id: &str) {
        if self.entries.remove(id).is_some() {
            self.insertion_order.retain(|k| k != id);
        }
    }
}
