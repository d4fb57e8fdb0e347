//! Caching wrappers for domain call sites
//!
//! Domain code wraps its expensive producers explicitly instead of going
//! through the manager API at every call site: [`cached`] gives the full
//! tiered read-through behavior, [`coalesced`] only deduplicates concurrent
//! calls without persisting anything, and [`NamespaceHandle`] binds a
//! namespace once for call sites that always use the same one.

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::manager::CacheManager;
use crate::store::VersionedRecord;

/// Run `loader` through the cache: serve from the fastest tier that has the
/// key, otherwise load once (across concurrent callers) and persist.
pub async fn cached<T, S, F, Fut>(
    manager: &CacheManager,
    namespace: &str,
    key_inputs: &S,
    loader: F,
) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    S: Serialize + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>> + Send,
{
    manager.get(namespace, key_inputs, loader).await
}

/// Deduplicate concurrent runs of `producer` without touching any tier
pub async fn coalesced<T, S, F, Fut>(
    manager: &CacheManager,
    namespace: &str,
    key_inputs: &S,
    producer: F,
) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    S: Serialize + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>> + Send,
{
    manager.coalesced(namespace, key_inputs, producer).await
}

/// A manager bound to one namespace
///
/// Saves call sites from repeating the namespace string, and keeps the
/// namespace choice in one place per domain type.
#[derive(Clone)]
pub struct NamespaceHandle {
    manager: Arc<CacheManager>,
    namespace: String,
}

impl NamespaceHandle {
    /// Bind a namespace
    pub fn new(manager: Arc<CacheManager>, namespace: impl Into<String>) -> Self {
        Self {
            manager,
            namespace: namespace.into(),
        }
    }

    /// The bound namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Tiered read-through get
    pub async fn get<T, S, F, Fut>(&self, key_inputs: &S, loader: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        S: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send,
    {
        self.manager.get(&self.namespace, key_inputs, loader).await
    }

    /// Write-through put
    pub async fn put<T, S>(&self, key_inputs: &S, value: &T) -> Result<VersionedRecord>
    where
        T: Serialize,
        S: Serialize + ?Sized,
    {
        self.manager.put(&self.namespace, key_inputs, value).await
    }

    /// Remove from the fast tiers
    pub async fn invalidate<S>(&self, key_inputs: &S) -> Result<()>
    where
        S: Serialize + ?Sized,
    {
        self.manager.invalidate(&self.namespace, key_inputs).await
    }

    /// Dedup-only variant
    pub async fn coalesced<T, S, F, Fut>(&self, key_inputs: &S, producer: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        S: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send,
    {
        self.manager
            .coalesced(&self.namespace, key_inputs, producer)
            .await
    }
}

// =============================================================================
// Tests
// =============================================================================
