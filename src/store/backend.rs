//! Backing store interface
//!
//! The versioned store reaches its authoritative database only through
//! [`StorageBackend`]. The engine never depends on the backing store's own
//! types; records cross this boundary as [`RawRecord`].
//!
//! `commit_record` implements optimistic concurrency: the caller states the
//! head digest it based its write on, and the backend refuses the commit if
//! another writer advanced the chain first.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use super::record::RawRecord;
use crate::digest::ContentDigest;
use crate::error::{Error, Result};

/// Outcome of an optimistic commit
#[derive(Debug, Clone)]
pub enum CommitOutcome {
    /// The record is now the chain head
    Committed,
    /// Another writer advanced the chain; retry by rebasing onto this head
    Conflict {
        /// The head the backend currently holds
        current_head: Option<ContentDigest>,
    },
}

/// Interface to the authoritative backing store
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Fetch the current chain head for a logical key
    async fn fetch_record(&self, namespace: &str, logical_key: &str)
        -> Result<Option<RawRecord>>;

    /// Fetch a specific chain member by its digest (used for chain walks)
    async fn fetch_version(
        &self,
        namespace: &str,
        logical_key: &str,
        digest: &ContentDigest,
    ) -> Result<Option<RawRecord>>;

    /// Fetch blob bytes by digest
    async fn fetch_blob(&self, digest: &ContentDigest) -> Result<Option<Bytes>>;

    /// Store blob bytes under their digest (idempotent; existing blobs are
    /// left untouched, which is what dedups identical content)
    async fn put_blob(&self, digest: &ContentDigest, data: Bytes) -> Result<()>;

    /// Commit a record as the new chain head
    ///
    /// Atomic from the caller's view: the head check, the prior head's
    /// `superseded_by` update, and the insert land together or not at all.
    async fn commit_record(
        &self,
        namespace: &str,
        logical_key: &str,
        record: RawRecord,
        expected_prior_head: Option<ContentDigest>,
    ) -> Result<CommitOutcome>;
}

// =============================================================================
// In-Memory Backend
// =============================================================================

/// One logical resource's chain
#[derive(Default)]
struct ChainSlot {
    head: Option<ContentDigest>,
    records: std::collections::HashMap<ContentDigest, RawRecord>,
}

/// In-memory backend for tests
///
/// Uses DashMap so concurrent commits to different keys never contend, and
/// commits to the same key are serialized by the map's entry guard.
pub struct InMemoryBackend {
    /// (namespace, logical key) -> chain
    chains: DashMap<(String, String), ChainSlot>,
    /// Blob storage by digest
    blobs: DashMap<ContentDigest, Bytes>,
    /// Failure injection switch for degradation tests
    unavailable: AtomicBool,
    /// Statistics
    reads: AtomicU64,
    writes: AtomicU64,
    blob_reads: AtomicU64,
    blob_writes: AtomicU64,
    conflicts: AtomicU64,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self {
            chains: DashMap::new(),
            blobs: DashMap::new(),
            unavailable: AtomicBool::new(false),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            blob_reads: AtomicU64::new(0),
            blob_writes: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
        }
    }
}

impl InMemoryBackend {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle simulated unavailability
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::BackendUnavailable("in-memory backend down".into()));
        }
        Ok(())
    }

    /// Number of stored blobs
    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }

    /// Total records across all chains
    pub fn record_count(&self) -> usize {
        self.chains.iter().map(|slot| slot.records.len()).sum()
    }

    /// Get backend statistics
    pub fn stats(&self) -> BackendStats {
        BackendStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            blob_reads: self.blob_reads.load(Ordering::Relaxed),
            blob_writes: self.blob_writes.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
        }
    }
}

/// Backend operation counters
#[derive(Debug, Clone, Default)]
pub struct BackendStats {
    /// Record fetches
    pub reads: u64,
    /// Record commits
    pub writes: u64,
    /// Blob fetches
    pub blob_reads: u64,
    /// Blob stores
    pub blob_writes: u64,
    /// Rejected commits
    pub conflicts: u64,
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn fetch_record(
        &self,
        namespace: &str,
        logical_key: &str,
    ) -> Result<Option<RawRecord>> {
        self.check_available()?;
        self.reads.fetch_add(1, Ordering::Relaxed);

        let slot = match self
            .chains
            .get(&(namespace.to_string(), logical_key.to_string()))
        {
            Some(s) => s,
            None => return Ok(None),
        };
        Ok(slot
            .head
            .and_then(|digest| slot.records.get(&digest).cloned()))
    }

    async fn fetch_version(
        &self,
        namespace: &str,
        logical_key: &str,
        digest: &ContentDigest,
    ) -> Result<Option<RawRecord>> {
        self.check_available()?;
        self.reads.fetch_add(1, Ordering::Relaxed);

        let slot = match self
            .chains
            .get(&(namespace.to_string(), logical_key.to_string()))
        {
            Some(s) => s,
            None => return Ok(None),
        };
        Ok(slot.records.get(digest).cloned())
    }

    async fn fetch_blob(&self, digest: &ContentDigest) -> Result<Option<Bytes>> {
        self.check_available()?;
        self.blob_reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.blobs.get(digest).map(|b| b.value().clone()))
    }

    async fn put_blob(&self, digest: &ContentDigest, data: Bytes) -> Result<()> {
        self.check_available()?;
        self.blob_writes.fetch_add(1, Ordering::Relaxed);
        // Content-addressed: an existing blob is byte-identical by definition
        self.blobs.entry(*digest).or_insert(data);
        Ok(())
    }

    async fn commit_record(
        &self,
        namespace: &str,
        logical_key: &str,
        record: RawRecord,
        expected_prior_head: Option<ContentDigest>,
    ) -> Result<CommitOutcome> {
        self.check_available()?;
        self.writes.fetch_add(1, Ordering::Relaxed);

        // The entry guard holds this chain exclusively for the whole commit
        let mut slot = self
            .chains
            .entry((namespace.to_string(), logical_key.to_string()))
            .or_default();

        if slot.head != expected_prior_head {
            self.conflicts.fetch_add(1, Ordering::Relaxed);
            return Ok(CommitOutcome::Conflict {
                current_head: slot.head,
            });
        }

        let new_digest = record.digest;
        if let Some(prior) = slot.head {
            if let Some(prior_record) = slot.records.get_mut(&prior) {
                prior_record.superseded_by = Some(new_digest);
            }
        }
        slot.records.insert(new_digest, record);
        slot.head = Some(new_digest);

        Ok(CommitOutcome::Committed)
    }
}

// =============================================================================
// Tests
// =============================================================================
