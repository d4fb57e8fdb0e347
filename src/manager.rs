//! Cache Manager - Unified Three-Tier Facade
//!
//! Orchestrates the memory tier (L1), disk tier (L2), and versioned store
//! (L3) behind typed get/put/invalidate operations.
//!
//! # Read path
//!
//! L1 → L2 → L3 → loader. A hit in a slower tier backfills the faster ones
//! (copies, never shared references). A full miss routes the loader through
//! single-flight so concurrent requests for the same key trigger exactly
//! one load, then writes the result through all three tiers.
//!
//! # Degradation
//!
//! Tier-local failures (timeouts, unreadable entries, an unreachable
//! backend) degrade to a miss for that tier as long as something further
//! down can still serve the request. Only loader failures and exhausted
//! write retries reach the caller.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::codec::Codec;
use crate::config::{DiskConfig, ManagerConfig, NamespacePolicy, NamespaceRegistry};
use crate::entry::CacheEntry;
use crate::error::{Error, Result};
use crate::key::{CacheKey, KeyGenerator};
use crate::l1::L1Cache;
use crate::l2::L2Cache;
use crate::metrics::{CacheMetrics, MetricsSnapshot};
use crate::singleflight::SingleFlight;
use crate::store::{StorageBackend, VersionedRecord, VersionedStore};

/// Cache tier enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    /// L1 - memory
    L1,
    /// L2 - disk
    L2,
    /// L3 - versioned store
    L3,
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheTier::L1 => write!(f, "L1 (memory)"),
            CacheTier::L2 => write!(f, "L2 (disk)"),
            CacheTier::L3 => write!(f, "L3 (store)"),
        }
    }
}

/// Unified cache manager
pub struct CacheManager {
    /// Namespace policies
    registry: Arc<NamespaceRegistry>,
    /// Value codec
    codec: Codec,
    /// L1 (memory) cache
    l1: L1Cache,
    /// L2 (disk) cache
    l2: Arc<L2Cache>,
    /// L3 (versioned store)
    store: Arc<VersionedStore>,
    /// Loader coalescing
    flight: SingleFlight<Bytes>,
    /// Configuration
    config: ManagerConfig,
    /// Metrics collector
    metrics: Arc<CacheMetrics>,
}

impl CacheManager {
    /// Create a manager with default configuration
    pub fn new(
        registry: Arc<NamespaceRegistry>,
        disk: DiskConfig,
        backend: Arc<dyn StorageBackend>,
    ) -> Result<Self> {
        Self::with_config(ManagerConfig::default(), registry, disk, backend)
    }

    /// Create a manager with custom configuration
    pub fn with_config(
        config: ManagerConfig,
        registry: Arc<NamespaceRegistry>,
        disk: DiskConfig,
        backend: Arc<dyn StorageBackend>,
    ) -> Result<Self> {
        let l1 = L1Cache::new(&registry);
        let l2 = Arc::new(L2Cache::open(disk)?);
        let store = Arc::new(VersionedStore::new(
            backend,
            Arc::clone(&registry),
            config.max_commit_retries,
        ));

        Ok(Self {
            registry,
            codec: Codec::new(),
            l1,
            l2,
            store,
            flight: SingleFlight::new(),
            config,
            metrics: Arc::new(CacheMetrics::new()),
        })
    }

    /// Get a value, loading it on a full miss
    ///
    /// `signature` identifies the logical call (it is canonicalized and
    /// hashed into the cache key). The loader runs at most once per key
    /// across concurrent callers.
    pub async fn get<T, S, F, Fut>(&self, namespace: &str, signature: &S, loader: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        S: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send,
    {
        let policy = self.registry.policy(namespace)?.clone();
        let key = KeyGenerator::derive(namespace, signature)?;

        // L1
        if let Some(entry) = self.l1.get(&key) {
            match self.codec.deserialize::<T>(entry.value()) {
                Ok(value) => {
                    self.metrics.record_l1_hit();
                    debug!(key = %key, tier = %CacheTier::L1, "cache hit");
                    return Ok(value);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "dropping undecodable memory tier entry");
                    self.metrics.record_decode_drop();
                    self.l1.remove(&key);
                }
            }
        }
        self.metrics.record_l1_miss();

        // L2
        if let Some(entry) = self.l2_get(&key).await {
            match self.codec.deserialize::<T>(entry.value()) {
                Ok(value) => {
                    self.metrics.record_l2_hit();
                    debug!(key = %key, tier = %CacheTier::L2, "cache hit");
                    // Backfill L1 with a fresh memory TTL
                    self.l1.put(
                        &key,
                        CacheEntry::new(entry.value().clone(), policy.memory_ttl),
                    );
                    return Ok(value);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "dropping undecodable disk tier entry");
                    self.metrics.record_decode_drop();
                    self.l2_remove(&key).await;
                }
            }
        }
        self.metrics.record_l2_miss();

        // L3
        if let Some(payload) = self.store_get(namespace, &key).await {
            match self.codec.deserialize::<T>(&payload) {
                Ok(value) => {
                    self.metrics.record_l3_hit();
                    debug!(key = %key, tier = %CacheTier::L3, "cache hit");
                    self.l2_put(&key, &policy, payload.clone()).await;
                    self.l1
                        .put(&key, CacheEntry::new(payload, policy.memory_ttl));
                    return Ok(value);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "versioned store payload undecodable");
                    self.metrics.record_decode_drop();
                }
            }
        }
        self.metrics.record_l3_miss();

        // Full miss: load once per key, write through, fan the bytes out
        let key_str = key.to_string();
        let flight_key = key_str.clone();
        let bytes = self
            .flight
            .run(&flight_key, || async move {
                self.metrics.record_load();
                debug!(key = %key_str, "cache miss, invoking loader");

                let value = match loader().await {
                    Ok(value) => value,
                    Err(e) => {
                        self.metrics.record_load_failure();
                        return Err(e);
                    }
                };
                let bytes = self.codec.serialize(&value)?;

                // L3 first; a degraded store must not discard a good load
                match tokio::time::timeout(
                    self.config.store_timeout,
                    self.store.put(namespace, &key_str, bytes.clone()),
                )
                .await
                {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) if e.is_degradable() => {
                        warn!(key = %key_str, error = %e, "skipping versioned store write");
                        self.metrics.record_tier_error();
                    }
                    Ok(Err(e)) => return Err(e),
                    Err(_) => {
                        warn!(key = %key_str, "versioned store write timed out");
                        self.metrics.record_tier_timeout();
                    }
                }

                self.l2_put(&key, &policy, bytes.clone()).await;
                self.l1
                    .put(&key, CacheEntry::new(bytes.clone(), policy.memory_ttl));
                Ok(bytes)
            })
            .await?;

        self.codec.deserialize(&bytes)
    }

    /// Write a value through all tiers
    ///
    /// The versioned store is written first (source of truth); its failure
    /// fails the operation. The faster tiers are then refreshed.
    pub async fn put<T, S>(
        &self,
        namespace: &str,
        signature: &S,
        value: &T,
    ) -> Result<VersionedRecord>
    where
        T: Serialize,
        S: Serialize + ?Sized,
    {
        let policy = self.registry.policy(namespace)?.clone();
        let key = KeyGenerator::derive(namespace, signature)?;
        let bytes = self.codec.serialize(value)?;
        let key_str = key.to_string();

        let record = tokio::time::timeout(
            self.config.store_timeout,
            self.store.put(namespace, &key_str, bytes.clone()),
        )
        .await
        .map_err(|_| Error::BackendUnavailable("versioned store write timed out".into()))??;

        self.metrics.record_write();
        self.l2_put(&key, &policy, bytes.clone()).await;
        self.l1
            .put(&key, CacheEntry::new(bytes, policy.memory_ttl));

        Ok(record)
    }

    /// Remove a key from the memory and disk tiers
    ///
    /// The versioned store keeps its history; it is only ever superseded by
    /// new writes, never deleted here.
    pub async fn invalidate<S>(&self, namespace: &str, signature: &S) -> Result<()>
    where
        S: Serialize + ?Sized,
    {
        let key = KeyGenerator::derive(namespace, signature)?;
        self.l1.remove(&key);
        self.l2_remove(&key).await;
        self.metrics.record_invalidation();
        Ok(())
    }

    /// Deduplicate concurrent calls without touching any tier
    ///
    /// Concurrent callers with the same signature share one producer run;
    /// nothing is persisted.
    pub async fn coalesced<T, S, F, Fut>(
        &self,
        namespace: &str,
        signature: &S,
        producer: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        S: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send,
    {
        let key = KeyGenerator::derive(namespace, signature)?;
        let key_str = key.to_string();
        let bytes = self
            .flight
            .run(&key_str, || async move {
                let value = producer().await?;
                self.codec.serialize(&value)
            })
            .await?;
        self.codec.deserialize(&bytes)
    }

    // =========================================================================
    // Tier access helpers
    // =========================================================================

    /// Disk tier read with timeout; failures degrade to a miss
    async fn l2_get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let l2 = Arc::clone(&self.l2);
        let key_owned = key.clone();
        let read = tokio::task::spawn_blocking(move || l2.get(&key_owned));

        match tokio::time::timeout(self.config.disk_timeout, read).await {
            Ok(Ok(entry)) => entry,
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "disk tier read failed");
                self.metrics.record_tier_error();
                None
            }
            Err(_) => {
                warn!(key = %key, "disk tier read timed out");
                self.metrics.record_tier_timeout();
                None
            }
        }
    }

    /// Best-effort disk tier write
    async fn l2_put(&self, key: &CacheKey, policy: &NamespacePolicy, bytes: Bytes) {
        let l2 = Arc::clone(&self.l2);
        let key_owned = key.clone();
        let policy = policy.clone();
        let write =
            tokio::task::spawn_blocking(move || l2.put(&key_owned, &bytes, &policy));

        match tokio::time::timeout(self.config.disk_timeout, write).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => {
                warn!(key = %key, error = %e, "disk tier write failed");
                self.metrics.record_tier_error();
            }
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "disk tier write task failed");
                self.metrics.record_tier_error();
            }
            Err(_) => {
                warn!(key = %key, "disk tier write timed out");
                self.metrics.record_tier_timeout();
            }
        }
    }

    /// Best-effort disk tier removal
    async fn l2_remove(&self, key: &CacheKey) {
        let l2 = Arc::clone(&self.l2);
        let key_owned = key.clone();
        let _ = tokio::task::spawn_blocking(move || l2.remove(&key_owned)).await;
    }

    /// Versioned store read with timeout; degradable failures become misses
    async fn store_get(&self, namespace: &str, key: &CacheKey) -> Option<Bytes> {
        let key_str = key.to_string();
        match tokio::time::timeout(
            self.config.store_timeout,
            self.store.get(namespace, &key_str),
        )
        .await
        {
            Ok(Ok(Some((_record, payload)))) => Some(payload),
            Ok(Ok(None)) => None,
            Ok(Err(e)) if e.is_degradable() => {
                warn!(key = %key, error = %e, "versioned store read degraded to miss");
                self.metrics.record_tier_error();
                None
            }
            Ok(Err(e)) => {
                // Non-degradable read errors are still survivable here, the
                // loader is the remaining fallback
                warn!(key = %key, error = %e, "versioned store read failed");
                self.metrics.record_tier_error();
                None
            }
            Err(_) => {
                warn!(key = %key, "versioned store read timed out");
                self.metrics.record_tier_timeout();
                None
            }
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Get reference to the memory tier
    pub fn l1(&self) -> &L1Cache {
        &self.l1
    }

    /// Get reference to the disk tier
    pub fn l2(&self) -> &L2Cache {
        &self.l2
    }

    /// Get reference to the versioned store
    pub fn store(&self) -> &VersionedStore {
        &self.store
    }

    /// Get the namespace registry
    pub fn registry(&self) -> &NamespaceRegistry {
        &self.registry
    }

    /// Get metrics snapshot
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Drop every entry from the memory and disk tiers
    pub fn clear_caches(&self) {
        self.l1.clear();
        self.l2.clear();
    }
}

// =============================================================================
// Tests
// =============================================================================
