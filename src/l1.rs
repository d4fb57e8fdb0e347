//! L1 Cache - In-Memory Tier
//!
//! Per-namespace, capacity-bounded LRU with independent TTL expiry.
//!
//! # Design
//!
//! - One `lru::LruCache` per namespace behind its own `parking_lot::Mutex`,
//!   so unrelated namespaces never contend
//! - True LRU: a read refreshes recency; inserting past capacity evicts
//!   exactly the least-recently-used entry
//! - Entries expire via `expires_at` independent of LRU order; expired
//!   entries read as absent and are purged lazily
//! - No I/O; nothing blocks beyond the namespace lock

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;

use crate::config::NamespaceRegistry;
use crate::entry::CacheEntry;
use crate::key::CacheKey;

/// L1 cache - per-namespace in-memory LRU tier
pub struct L1Cache {
    /// One LRU per namespace, keyed by namespace name
    shards: HashMap<String, Mutex<LruCache<String, CacheEntry>>>,
    /// Hit count
    hits: AtomicU64,
    /// Miss count
    misses: AtomicU64,
    /// Eviction count (capacity evictions, not TTL purges)
    evictions: AtomicU64,
    /// Expired-entry purge count
    expirations: AtomicU64,
}

impl L1Cache {
    /// Build the memory tier from the namespace registry
    ///
    /// The registry is read-only after startup, so the shard set is fixed
    /// for the life of the tier.
    pub fn new(registry: &NamespaceRegistry) -> Self {
        let mut shards = HashMap::new();
        for namespace in registry.namespaces() {
            let capacity = registry
                .policy(namespace)
                .expect("namespace listed by registry")
                .memory_capacity;
            let capacity = NonZeroUsize::new(capacity).expect("validated nonzero at load");
            shards.insert(namespace.to_string(), Mutex::new(LruCache::new(capacity)));
        }

        Self {
            shards,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Get an entry, refreshing its recency
    ///
    /// Expired entries are treated as absent and purged in place.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let shard = match self.shards.get(key.namespace()) {
            Some(s) => s,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let mut cache = shard.lock();
        let key_str = key.to_string();

        match cache.get(&key_str).cloned() {
            Some(entry) if entry.is_expired() => {
                cache.pop(&key_str);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert an entry, evicting the least-recently-used one if at capacity
    ///
    /// Returns `false` if the namespace is not configured.
    pub fn put(&self, key: &CacheKey, entry: CacheEntry) -> bool {
        let shard = match self.shards.get(key.namespace()) {
            Some(s) => s,
            None => return false,
        };

        let key_str = key.to_string();
        let mut cache = shard.lock();
        if let Some((evicted_key, _)) = cache.push(key_str.clone(), entry) {
            // push returns the displaced LRU entry, or the old value when
            // the key was already present (not an eviction)
            if evicted_key != key_str {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        true
    }

    /// Remove an entry
    pub fn remove(&self, key: &CacheKey) -> bool {
        let shard = match self.shards.get(key.namespace()) {
            Some(s) => s,
            None => return false,
        };
        shard.lock().pop(&key.to_string()).is_some()
    }

    /// Check presence without refreshing recency (expired counts as absent)
    pub fn contains(&self, key: &CacheKey) -> bool {
        let shard = match self.shards.get(key.namespace()) {
            Some(s) => s,
            None => return false,
        };
        shard
            .lock()
            .peek(&key.to_string())
            .map(|e| !e.is_expired())
            .unwrap_or(false)
    }

    /// Number of entries in a namespace (including not-yet-purged expired ones)
    pub fn len(&self, namespace: &str) -> usize {
        self.shards
            .get(namespace)
            .map(|s| s.lock().len())
            .unwrap_or(0)
    }

    /// True if the whole tier holds no entries
    pub fn is_empty(&self) -> bool {
        self.shards.values().all(|s| s.lock().is_empty())
    }

    /// Drop all entries in all namespaces
    pub fn clear(&self) {
        for shard in self.shards.values() {
            shard.lock().clear();
        }
    }

    /// Get hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get eviction count
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Get expired-purge count
    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    /// Get hit ratio
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }
}

/// L1 cache statistics
#[derive(Debug, Clone)]
pub struct L1Stats {
    /// Total entries across namespaces
    pub entries: usize,
    /// Hit count
    pub hits: u64,
    /// Miss count
    pub misses: u64,
    /// Hit ratio (0.0 - 1.0)
    pub hit_ratio: f64,
    /// Capacity eviction count
    pub evictions: u64,
    /// Expired purge count
    pub expirations: u64,
}

impl L1Cache {
    /// Get cache statistics
    pub fn stats(&self) -> L1Stats {
        let entries = self.shards.values().map(|s| s.lock().len()).sum();
        L1Stats {
            entries,
            hits: self.hits(),
            misses: self.misses(),
            hit_ratio: self.hit_ratio(),
            evictions: self.evictions(),
            expirations: self.expirations(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
