//! L3 - Content-Addressable Versioned Store
//!
//! Fronts the authoritative backing store. Every logical resource has a
//! version chain: the newest record is the head, older versions hang off it
//! through `supersedes` links, and each superseded record points forward
//! through `superseded_by`. Payload identity is the SHA-256 of the
//! serialized bytes, which dedups identical content across writers.
//!
//! # Write protocol
//!
//! Writes to one `(namespace, logicalKey)` are serialized by a per-key
//! async lock (never a global one). The commit itself is optimistic: it
//! names the head digest it was based on, and when another writer (e.g.
//! another process sharing the backing store) advanced the chain first, the
//! write is rebased onto the new head and retried, a bounded number of
//! times.

mod backend;
mod lock;
mod record;

pub use backend::{BackendStats, CommitOutcome, InMemoryBackend, StorageBackend};
pub use lock::{KeyLockGuard, KeyLockTable};
pub use record::{Payload, RawRecord, VersionInfo, VersionedRecord};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use tracing::{debug, warn};

use crate::config::NamespaceRegistry;
use crate::digest::ContentDigest;
use crate::error::{Error, Result};

/// L3 cache - versioned store over the backing database
pub struct VersionedStore {
    /// Backing store transport
    backend: Arc<dyn StorageBackend>,
    /// Namespace policies (inline thresholds)
    registry: Arc<NamespaceRegistry>,
    /// Per-resource write locks
    locks: KeyLockTable,
    /// Bound on optimistic-commit retries
    max_commit_retries: u32,
    /// Hit count
    hits: AtomicU64,
    /// Miss count
    misses: AtomicU64,
    /// Committed writes
    writes: AtomicU64,
    /// Idempotent writes skipped (head already had the digest)
    dedup_skips: AtomicU64,
    /// Commits retried after a conflict
    conflict_retries: AtomicU64,
}

impl VersionedStore {
    /// Create a store over the given backend
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        registry: Arc<NamespaceRegistry>,
        max_commit_retries: u32,
    ) -> Self {
        Self {
            backend,
            registry,
            locks: KeyLockTable::new(),
            max_commit_retries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            dedup_skips: AtomicU64::new(0),
            conflict_retries: AtomicU64::new(0),
        }
    }

    /// Create with an in-memory backend (for testing)
    pub fn in_memory(registry: Arc<NamespaceRegistry>) -> Self {
        Self::new(
            Arc::new(InMemoryBackend::new()),
            registry,
            crate::config::DEFAULT_MAX_COMMIT_RETRIES,
        )
    }

    /// Get the current chain head and its verified payload bytes
    pub async fn get(
        &self,
        namespace: &str,
        logical_key: &str,
    ) -> Result<Option<(VersionedRecord, Bytes)>> {
        let raw = self.backend.fetch_record(namespace, logical_key).await?;
        let record = match raw {
            Some(raw) => raw.into_record(),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        };

        let payload = self.resolve_and_verify(logical_key, &record).await?;
        self.hits.fetch_add(1, Ordering::Relaxed);
        Ok(Some((record, payload)))
    }

    /// Point-in-time lookup: walk the chain back to a version number
    pub async fn get_version(
        &self,
        namespace: &str,
        logical_key: &str,
        version_number: u64,
    ) -> Result<Option<(VersionedRecord, Bytes)>> {
        let head = match self.backend.fetch_record(namespace, logical_key).await? {
            Some(raw) => raw.into_record(),
            None => return Ok(None),
        };

        if version_number > head.version.version_number || version_number == 0 {
            return Ok(None);
        }

        let mut current = head;
        while current.version.version_number != version_number {
            let prior_digest = match current.version.supersedes {
                Some(digest) => digest,
                // Chain ended before the requested version; treat as absent
                None => return Ok(None),
            };
            current = match self
                .backend
                .fetch_version(namespace, logical_key, &prior_digest)
                .await?
            {
                Some(raw) => raw.into_record(),
                None => return Ok(None),
            };
        }

        let payload = self.resolve_and_verify(logical_key, &current).await?;
        Ok(Some((current, payload)))
    }

    /// Write a value, creating a new chain head unless the current head
    /// already holds identical content
    ///
    /// Serialized against other writers of the same key; commits are rebased
    /// and retried on optimistic conflicts up to the configured bound.
    pub async fn put(
        &self,
        namespace: &str,
        logical_key: &str,
        value: Bytes,
    ) -> Result<VersionedRecord> {
        let policy = self.registry.policy(namespace)?;
        let digest = ContentDigest::of(&value);

        let lock_key = format!("{namespace}/{logical_key}");
        let _guard = self.locks.acquire(&lock_key).await;

        let mut head = self
            .backend
            .fetch_record(namespace, logical_key)
            .await?
            .map(RawRecord::into_record);

        // Idempotent no-op: the head already holds this content
        if let Some(ref h) = head {
            if h.digest == digest {
                self.dedup_skips.fetch_add(1, Ordering::Relaxed);
                debug!(key = %lock_key, digest = %digest, "write skipped, head already current");
                return Ok(h.clone());
            }
        }

        // Large payloads become blobs; put_blob dedups by digest, so
        // identical content in this namespace is stored once
        let payload = if value.len() >= policy.inline_threshold_bytes {
            self.backend.put_blob(&digest, value.clone()).await?;
            Payload::Blob(digest)
        } else {
            Payload::Inline(value.clone())
        };

        let mut attempts = 0u32;
        loop {
            let record = VersionedRecord {
                digest,
                payload: payload.clone(),
                version: VersionInfo {
                    version_number: head.as_ref().map(|h| h.version.version_number + 1).unwrap_or(1),
                    created_at: Utc::now(),
                    supersedes: head.as_ref().map(|h| h.digest),
                    superseded_by: None,
                },
            };

            let outcome = self
                .backend
                .commit_record(
                    namespace,
                    logical_key,
                    RawRecord::from_record(&record),
                    head.as_ref().map(|h| h.digest),
                )
                .await?;

            match outcome {
                CommitOutcome::Committed => {
                    self.writes.fetch_add(1, Ordering::Relaxed);
                    return Ok(record);
                }
                CommitOutcome::Conflict { current_head } => {
                    attempts += 1;
                    self.conflict_retries.fetch_add(1, Ordering::Relaxed);
                    if attempts >= self.max_commit_retries {
                        return Err(Error::WriteConflict {
                            key: lock_key,
                            attempts,
                        });
                    }

                    // Rebase onto whatever won the race
                    head = match current_head {
                        Some(winner) => {
                            let raw = self
                                .backend
                                .fetch_version(namespace, logical_key, &winner)
                                .await?;
                            match raw {
                                Some(raw) => Some(raw.into_record()),
                                // Head moved again between the conflict and
                                // our re-read; fall back to the live head
                                None => self
                                    .backend
                                    .fetch_record(namespace, logical_key)
                                    .await?
                                    .map(RawRecord::into_record),
                            }
                        }
                        None => None,
                    };

                    // The winner may have written exactly our content
                    if let Some(ref h) = head {
                        if h.digest == digest {
                            self.dedup_skips.fetch_add(1, Ordering::Relaxed);
                            return Ok(h.clone());
                        }
                    }
                    warn!(key = %logical_key, attempt = attempts, "commit conflict, rebasing");
                }
            }
        }
    }

    /// Resolve payload bytes (inline or blob) and verify the stored digest
    async fn resolve_and_verify(
        &self,
        logical_key: &str,
        record: &VersionedRecord,
    ) -> Result<Bytes> {
        let payload = match &record.payload {
            Payload::Inline(bytes) => bytes.clone(),
            Payload::Blob(digest) => match self.backend.fetch_blob(digest).await? {
                Some(bytes) => bytes,
                None => {
                    warn!(key = %logical_key, digest = %digest, "blob missing for record");
                    return Err(Error::CorruptionDetected {
                        key: logical_key.to_string(),
                        stored: digest.to_hex(),
                        computed: "<blob missing>".to_string(),
                    });
                }
            },
        };

        let computed = ContentDigest::of(&payload);
        if computed != record.digest {
            warn!(
                key = %logical_key,
                stored = %record.digest,
                computed = %computed,
                "digest mismatch, record unreadable"
            );
            return Err(Error::CorruptionDetected {
                key: logical_key.to_string(),
                stored: record.digest.to_hex(),
                computed: computed.to_hex(),
            });
        }
        Ok(payload)
    }

    /// Get hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get committed write count
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Get idempotent-skip count
    pub fn dedup_skips(&self) -> u64 {
        self.dedup_skips.load(Ordering::Relaxed)
    }

    /// Get conflict-retry count
    pub fn conflict_retries(&self) -> u64 {
        self.conflict_retries.load(Ordering::Relaxed)
    }

    /// Number of keys currently holding a write lock slot
    pub fn live_lock_slots(&self) -> usize {
        self.locks.len()
    }
}

/// L3 statistics
#[derive(Debug, Clone)]
pub struct StoreStats {
    /// Hit count
    pub hits: u64,
    /// Miss count
    pub misses: u64,
    /// Committed writes
    pub writes: u64,
    /// Idempotent skips
    pub dedup_skips: u64,
    /// Conflict retries
    pub conflict_retries: u64,
}

impl VersionedStore {
    /// Get store statistics
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            hits: self.hits(),
            misses: self.misses(),
            writes: self.writes(),
            dedup_skips: self.dedup_skips(),
            conflict_retries: self.conflict_retries(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NamespacePolicy;

    fn registry() -> Arc<NamespaceRegistry> {
        Arc::new(
            NamespaceRegistry::new(vec![(
                "dictionary".to_string(),
                NamespacePolicy {
                    inline_threshold_bytes: 64,
                    ..NamespacePolicy::default()
                },
            )])
            .unwrap(),
        )
    }

    fn store() -> (VersionedStore, Arc<InMemoryBackend>) {
        let backend = Arc::new(InMemoryBackend::new());
        let store = VersionedStore::new(backend.clone(), registry(), 5);
        (store, backend)
    }

    #[tokio::test]
    async fn test_first_write_is_version_one() {
        let (store, _) = store();

        let record = store
            .put("dictionary", "entry:run", Bytes::from_static(b"to move fast"))
            .await
            .unwrap();

        assert_eq!(record.version.version_number, 1);
        assert!(record.is_first());
        assert!(record.is_head());
    }

    #[tokio::test]
    async fn test_get_returns_head_payload() {
        let (store, _) = store();

        store
            .put("dictionary", "entry:run", Bytes::from_static(b"v1"))
            .await
            .unwrap();
        store
            .put("dictionary", "entry:run", Bytes::from_static(b"v2"))
            .await
            .unwrap();

        let (record, payload) = store.get("dictionary", "entry:run").await.unwrap().unwrap();
        assert_eq!(record.version.version_number, 2);
        assert_eq!(payload.as_ref(), b"v2");
    }

    #[tokio::test]
    async fn test_absent_key() {
        let (store, _) = store();
        assert!(store
            .get("dictionary", "entry:missing")
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.misses(), 1);
    }

    #[tokio::test]
    async fn test_idempotent_rewrite() {
        let (store, backend) = store();

        let first = store
            .put("dictionary", "entry:run", Bytes::from_static(b"same"))
            .await
            .unwrap();
        let second = store
            .put("dictionary", "entry:run", Bytes::from_static(b"same"))
            .await
            .unwrap();

        assert_eq!(first.digest, second.digest);
        assert_eq!(second.version.version_number, 1);
        assert_eq!(store.dedup_skips(), 1);
        assert_eq!(backend.record_count(), 1);
    }

    #[tokio::test]
    async fn test_chain_links_both_directions() {
        let (store, _) = store();

        let versions: Vec<VersionedRecord> = {
            let mut out = Vec::new();
            for content in ["v1", "v2", "v3", "v4"] {
                out.push(
                    store
                        .put("dictionary", "entry:run", Bytes::from(content.as_bytes().to_vec()))
                        .await
                        .unwrap(),
                );
            }
            out
        };

        // Walk supersedes from the head exactly N-1 times to the first
        let (head, _) = store.get("dictionary", "entry:run").await.unwrap().unwrap();
        assert_eq!(head.version.version_number, 4);

        let mut current = head;
        for expected in (1..=3u64).rev() {
            let (prior, payload) = store
                .get_version("dictionary", "entry:run", expected)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(prior.version.version_number, expected);
            assert_eq!(payload.as_ref(), format!("v{expected}").as_bytes());
            // Mutual consistency of the links
            assert_eq!(current.version.supersedes, Some(prior.digest));
            assert_eq!(prior.version.superseded_by, Some(current.digest));
            current = prior;
        }
        assert!(current.is_first());
        assert_eq!(versions[0].digest, current.digest);
    }

    #[tokio::test]
    async fn test_get_version_out_of_range() {
        let (store, _) = store();
        store
            .put("dictionary", "entry:run", Bytes::from_static(b"v1"))
            .await
            .unwrap();

        assert!(store
            .get_version("dictionary", "entry:run", 0)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .get_version("dictionary", "entry:run", 2)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_blob_threshold_and_dedup() {
        let (store, backend) = store();

        // 64-byte threshold: this payload becomes a blob
        let big = Bytes::from(vec![7u8; 256]);
        let a = store
            .put("dictionary", "entry:run", big.clone())
            .await
            .unwrap();
        assert!(matches!(a.payload, Payload::Blob(_)));

        // Same content under a different logical key shares the blob
        let b = store
            .put("dictionary", "entry:sprint", big.clone())
            .await
            .unwrap();
        assert_eq!(a.digest, b.digest);
        assert_eq!(backend.blob_count(), 1);

        // Both records read back the shared payload
        let (_, payload) = store
            .get("dictionary", "entry:sprint")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload, big);
    }

    #[tokio::test]
    async fn test_small_payload_stays_inline() {
        let (store, backend) = store();

        let record = store
            .put("dictionary", "entry:run", Bytes::from_static(b"short"))
            .await
            .unwrap();
        assert!(record.payload.is_inline());
        assert_eq!(backend.blob_count(), 0);
    }

    #[tokio::test]
    async fn test_corruption_detected_on_read() {
        let registry = registry();
        let backend = Arc::new(InMemoryBackend::new());
        let store = VersionedStore::new(backend.clone(), registry, 5);

        // Commit a record whose digest does not match its bytes
        let bogus = RawRecord {
            digest: ContentDigest::of(b"what the digest claims"),
            inline: Some(b"what is actually stored".to_vec()),
            blob: None,
            version_number: 1,
            created_at: Utc::now(),
            supersedes: None,
            superseded_by: None,
        };
        backend
            .commit_record("dictionary", "entry:run", bogus, None)
            .await
            .unwrap();

        let result = store.get("dictionary", "entry:run").await;
        assert!(matches!(result, Err(Error::CorruptionDetected { .. })));
    }

    #[tokio::test]
    async fn test_missing_blob_is_corruption() {
        let registry = registry();
        let backend = Arc::new(InMemoryBackend::new());
        let store = VersionedStore::new(backend.clone(), registry, 5);

        let data = vec![1u8; 128];
        let bogus = RawRecord {
            digest: ContentDigest::of(&data),
            inline: None,
            blob: Some(ContentDigest::of(&data)),
            version_number: 1,
            created_at: Utc::now(),
            supersedes: None,
            superseded_by: None,
        };
        backend
            .commit_record("dictionary", "entry:run", bogus, None)
            .await
            .unwrap();

        let result = store.get("dictionary", "entry:run").await;
        assert!(matches!(result, Err(Error::CorruptionDetected { .. })));
    }

    #[tokio::test]
    async fn test_concurrent_puts_chain_not_race() {
        let registry = registry();
        let backend = Arc::new(InMemoryBackend::new());
        let store = Arc::new(VersionedStore::new(backend, registry, 5));

        let a = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .put("dictionary", "entry:run", Bytes::from_static(b"A"))
                    .await
                    .unwrap()
            })
        };
        let b = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .put("dictionary", "entry:run", Bytes::from_static(b"B"))
                    .await
                    .unwrap()
            })
        };

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        let mut versions = [a.version.version_number, b.version.version_number];
        versions.sort_unstable();
        assert_eq!(versions, [1, 2], "exactly one writer becomes each version");

        let (head, _) = store.get("dictionary", "entry:run").await.unwrap().unwrap();
        assert_eq!(head.version.version_number, 2);
        let (winner, loser) = if a.version.version_number == 2 {
            (a, b)
        } else {
            (b, a)
        };
        assert_eq!(winner.version.supersedes, Some(loser.digest));
    }

    #[tokio::test]
    async fn test_write_conflict_surfaces_after_retries() {
        struct AlwaysConflict;

        #[async_trait::async_trait]
        impl StorageBackend for AlwaysConflict {
            async fn fetch_record(&self, _: &str, _: &str) -> Result<Option<RawRecord>> {
                Ok(None)
            }
            async fn fetch_version(
                &self,
                _: &str,
                _: &str,
                _: &ContentDigest,
            ) -> Result<Option<RawRecord>> {
                Ok(None)
            }
            async fn fetch_blob(&self, _: &ContentDigest) -> Result<Option<Bytes>> {
                Ok(None)
            }
            async fn put_blob(&self, _: &ContentDigest, _: Bytes) -> Result<()> {
                Ok(())
            }
            async fn commit_record(
                &self,
                _: &str,
                _: &str,
                _: RawRecord,
                _: Option<ContentDigest>,
            ) -> Result<CommitOutcome> {
                // Pretend some other process always wins
                Ok(CommitOutcome::Conflict { current_head: None })
            }
        }

        let store = VersionedStore::new(Arc::new(AlwaysConflict), registry(), 3);
        let result = store
            .put("dictionary", "entry:run", Bytes::from_static(b"x"))
            .await;

        match result {
            Err(Error::WriteConflict { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected WriteConflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_lock_slots_do_not_accumulate() {
        let (store, _) = store();

        for i in 0..50 {
            store
                .put(
                    "dictionary",
                    &format!("entry:word-{i}"),
                    Bytes::from_static(b"def"),
                )
                .await
                .unwrap();
        }
        assert_eq!(store.live_lock_slots(), 0);
    }

    #[tokio::test]
    async fn test_unknown_namespace_rejected() {
        let (store, _) = store();
        let result = store
            .put("sessions", "token", Bytes::from_static(b"x"))
            .await;
        assert!(matches!(result, Err(Error::UnknownNamespace(_))));
    }
}
