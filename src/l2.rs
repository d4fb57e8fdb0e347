//! L2 Cache - On-Disk Tier
//!
//! Capacity-bounded disk cache with per-namespace TTL and transparent
//! compression.
//!
//! # Design
//!
//! - One file per entry at `<root>/<namespace>/<keyhash>.ent`
//! - Binary layout: magic + 4-byte LE header length + JSON header
//!   `{format, algorithm, expires_at, uncompressed_len, checksum}` +
//!   compressed payload
//! - Writes go to a temp file in the target directory and are atomically
//!   renamed into place, so an interrupted write never corrupts state
//! - A global byte ceiling is shared across namespaces; under pressure,
//!   expired entries are reclaimed first, then the globally
//!   least-recently-accessed entries regardless of namespace
//! - Reads verify magic, format version, and payload checksum; anything
//!   unreadable is treated as a miss and purged (fail-safe)
//! - The in-memory index is rebuilt by scanning the directory at startup

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::compression::{CompressionAlgorithm, CompressionManager};
use crate::config::{DiskConfig, NamespacePolicy};
use crate::digest::ContentDigest;
use crate::entry::CacheEntry;
use crate::error::{Error, Result};
use crate::key::CacheKey;

/// Magic bytes identifying a disk tier entry file
const ENTRY_MAGIC: &[u8; 4] = b"SCL2";

/// Current entry file format version
const ENTRY_FORMAT_VERSION: u32 = 1;

/// Entry file extension
const ENTRY_EXT: &str = "ent";

/// Returns current time as seconds since Unix epoch
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

// =============================================================================
// Entry File Header
// =============================================================================

/// Header stored ahead of every entry payload
#[derive(Debug, Serialize, Deserialize)]
struct EntryHeader {
    /// Entry format version
    format: u32,
    /// Compression algorithm applied to the payload
    algorithm: CompressionAlgorithm,
    /// Absolute expiry, seconds since Unix epoch
    expires_at: u64,
    /// Size of the payload before compression
    uncompressed_len: u64,
    /// Hex SHA-256 of the compressed payload bytes
    checksum: String,
}

// =============================================================================
// Index
// =============================================================================

/// In-memory location record for one entry file
struct IndexEntry {
    path: PathBuf,
    file_size: u64,
    expires_at: u64,
    /// Logical access clock tick, drives global LRU eviction
    last_access: AtomicU64,
}

// =============================================================================
// L2 Cache
// =============================================================================

/// L2 cache - capacity-bounded on-disk tier
pub struct L2Cache {
    /// Configuration
    config: DiskConfig,
    /// Compression codec table
    compression: CompressionManager,
    /// Key string -> file location
    index: RwLock<HashMap<String, IndexEntry>>,
    /// Total bytes currently on disk
    current_size: AtomicU64,
    /// Logical clock for access recency
    access_clock: AtomicU64,
    /// Hit count
    hits: AtomicU64,
    /// Miss count
    misses: AtomicU64,
    /// Eviction count (capacity pressure)
    evictions: AtomicU64,
    /// Expired-entry purge count
    expirations: AtomicU64,
}

impl L2Cache {
    /// Open the disk tier, creating the root directory and rebuilding the
    /// index from any entry files already present
    ///
    /// Unreadable or corrupt files are deleted rather than indexed.
    pub fn open(config: DiskConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.root)?;

        let cache = Self {
            config,
            compression: CompressionManager::new(),
            index: RwLock::new(HashMap::new()),
            current_size: AtomicU64::new(0),
            access_clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        };
        cache.rebuild_index()?;
        Ok(cache)
    }

    /// Scan the root directory and rebuild the in-memory index
    fn rebuild_index(&self) -> Result<()> {
        let now = epoch_secs();
        let mut index = self.index.write();
        let mut total = 0u64;

        for ns_dir in std::fs::read_dir(&self.config.root)? {
            let ns_dir = match ns_dir {
                Ok(d) if d.path().is_dir() => d,
                _ => continue,
            };
            let namespace = ns_dir.file_name().to_string_lossy().into_owned();

            for file in std::fs::read_dir(ns_dir.path())? {
                let file = match file {
                    Ok(f) => f,
                    Err(_) => continue,
                };
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
                    continue;
                }

                let header = match read_header(&path) {
                    Some(h) => h,
                    None => {
                        warn!(path = %path.display(), "removing unreadable disk tier entry");
                        let _ = std::fs::remove_file(&path);
                        continue;
                    }
                };

                if header.expires_at <= now {
                    let _ = std::fs::remove_file(&path);
                    continue;
                }

                let stem = match path.file_stem().and_then(|s| s.to_str()) {
                    Some(s) => s.to_string(),
                    None => continue,
                };
                let file_size = file.metadata().map(|m| m.len()).unwrap_or(0);
                total += file_size;

                index.insert(
                    format!("{namespace}:{stem}"),
                    IndexEntry {
                        path,
                        file_size,
                        expires_at: header.expires_at,
                        last_access: AtomicU64::new(0),
                    },
                );
            }
        }

        self.current_size.store(total, Ordering::Relaxed);
        debug!(
            entries = index.len(),
            bytes = total,
            "disk tier index rebuilt"
        );
        Ok(())
    }

    /// Path of the entry file for a key
    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.config
            .root
            .join(key.namespace())
            .join(format!("{}.{ENTRY_EXT}", key.digest_hex()))
    }

    /// Get an entry
    ///
    /// Expired or unreadable entries are treated as misses and purged.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let key_str = key.to_string();
        let now = epoch_secs();

        let (path, expires_at) = {
            let index = self.index.read();
            let entry = match index.get(&key_str) {
                Some(e) => e,
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            };
            if entry.expires_at <= now {
                drop(index);
                self.purge(&key_str);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            let tick = self.access_clock.fetch_add(1, Ordering::Relaxed) + 1;
            entry.last_access.store(tick, Ordering::Relaxed);
            (entry.path.clone(), entry.expires_at)
        };

        match self.read_entry(&path, expires_at) {
            Ok(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            Err(e) => {
                warn!(key = %key_str, error = %e, "disk tier entry unreadable, purging");
                self.purge(&key_str);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Read and validate an entry file
    fn read_entry(&self, path: &Path, expires_at: u64) -> Result<CacheEntry> {
        let raw = std::fs::read(path)?;

        if raw.len() < 8 || &raw[..4] != ENTRY_MAGIC {
            return Err(Error::Decode {
                reason: "bad entry magic".into(),
            });
        }

        let header_len = raw[4..8]
            .try_into()
            .map(u32::from_le_bytes)
            .map_err(|_| Error::Decode {
                reason: "truncated entry header".into(),
            })? as usize;
        if raw.len() < 8 + header_len {
            return Err(Error::Decode {
                reason: "truncated entry header".into(),
            });
        }

        let header: EntryHeader =
            serde_json::from_slice(&raw[8..8 + header_len]).map_err(|e| Error::Decode {
                reason: e.to_string(),
            })?;

        if header.format != ENTRY_FORMAT_VERSION {
            return Err(Error::Decode {
                reason: format!("unsupported entry format {}", header.format),
            });
        }

        let payload = &raw[8 + header_len..];
        let checksum = ContentDigest::of(payload).to_hex();
        if checksum != header.checksum {
            return Err(Error::Decode {
                reason: "entry checksum mismatch".into(),
            });
        }

        let value = self.compression.decompress(payload, header.algorithm)?;
        if value.len() as u64 != header.uncompressed_len {
            return Err(Error::Decode {
                reason: "decompressed length mismatch".into(),
            });
        }

        let remaining = Duration::from_secs(expires_at.saturating_sub(epoch_secs()));
        Ok(CacheEntry::new(value, remaining))
    }

    /// Write an entry
    ///
    /// Compresses per the namespace policy, evicts under capacity pressure,
    /// then atomically replaces the entry file.
    pub fn put(&self, key: &CacheKey, value: &Bytes, policy: &NamespacePolicy) -> Result<()> {
        let compressed = self.compression.compress(value, policy.compression)?;
        let expires_at = epoch_secs() + policy.disk_ttl.as_secs();

        let header = EntryHeader {
            format: ENTRY_FORMAT_VERSION,
            algorithm: policy.compression,
            expires_at,
            uncompressed_len: value.len() as u64,
            checksum: ContentDigest::of(&compressed).to_hex(),
        };
        let header_bytes = serde_json::to_vec(&header).map_err(|e| Error::Decode {
            reason: e.to_string(),
        })?;

        let file_size = (8 + header_bytes.len() + compressed.len()) as u64;
        if file_size > self.config.capacity_bytes {
            debug!(key = %key, size = file_size, "entry larger than disk tier ceiling, skipping");
            return Ok(());
        }

        self.evict_until_space(file_size);

        let path = self.entry_path(key);
        let dir = path.parent().expect("entry path has a parent");
        std::fs::create_dir_all(dir)?;

        // Temp file in the same directory so the rename stays on one filesystem
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(ENTRY_MAGIC)?;
        tmp.write_all(&(header_bytes.len() as u32).to_le_bytes())?;
        tmp.write_all(&header_bytes)?;
        tmp.write_all(&compressed)?;
        tmp.flush()?;
        tmp.persist(&path).map_err(|e| Error::Io(e.error))?;

        let key_str = key.to_string();
        let tick = self.access_clock.fetch_add(1, Ordering::Relaxed) + 1;
        let mut index = self.index.write();
        if let Some(old) = index.insert(
            key_str,
            IndexEntry {
                path,
                file_size,
                expires_at,
                last_access: AtomicU64::new(tick),
            },
        ) {
            self.current_size
                .fetch_sub(old.file_size, Ordering::Relaxed);
        }
        self.current_size.fetch_add(file_size, Ordering::Relaxed);

        Ok(())
    }

    /// Remove an entry and its file
    pub fn remove(&self, key: &CacheKey) -> bool {
        self.purge(&key.to_string())
    }

    fn purge(&self, key_str: &str) -> bool {
        let removed = self.index.write().remove(key_str);
        match removed {
            Some(entry) => {
                self.current_size
                    .fetch_sub(entry.file_size, Ordering::Relaxed);
                let _ = std::fs::remove_file(&entry.path);
                true
            }
            None => false,
        }
    }

    /// Check presence (expired counts as absent)
    pub fn contains(&self, key: &CacheKey) -> bool {
        let index = self.index.read();
        index
            .get(&key.to_string())
            .map(|e| e.expires_at > epoch_secs())
            .unwrap_or(false)
    }

    /// Evict until `needed` bytes fit under the ceiling
    ///
    /// Expired entries go first, then global LRU order across namespaces.
    fn evict_until_space(&self, needed: u64) {
        let target = self.config.capacity_bytes.saturating_sub(needed);
        if self.current_size.load(Ordering::Relaxed) <= target {
            return;
        }

        let now = epoch_secs();
        let mut expired: Vec<String> = Vec::new();
        let mut live: Vec<(String, u64)> = Vec::new();
        {
            let index = self.index.read();
            for (key, entry) in index.iter() {
                if entry.expires_at <= now {
                    expired.push(key.clone());
                } else {
                    live.push((key.clone(), entry.last_access.load(Ordering::Relaxed)));
                }
            }
        }

        for key in expired {
            if self.purge(&key) {
                self.expirations.fetch_add(1, Ordering::Relaxed);
            }
        }
        if self.current_size.load(Ordering::Relaxed) <= target {
            return;
        }

        // Oldest logical access first
        live.sort_by_key(|(_, tick)| *tick);
        for (key, _) in live {
            if self.current_size.load(Ordering::Relaxed) <= target {
                break;
            }
            if self.purge(&key) {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Get current size in bytes
    pub fn size(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    /// Get the byte ceiling
    pub fn capacity(&self) -> u64 {
        self.config.capacity_bytes
    }

    /// Get number of entries
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
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

    /// Remove all entries and their files
    pub fn clear(&self) {
        let mut index = self.index.write();
        for (_, entry) in index.drain() {
            let _ = std::fs::remove_file(&entry.path);
        }
        self.current_size.store(0, Ordering::Relaxed);
    }
}

/// Read just the header of an entry file, without the payload checksum pass
fn read_header(path: &Path) -> Option<EntryHeader> {
    let raw = std::fs::read(path).ok()?;
    if raw.len() < 8 || &raw[..4] != ENTRY_MAGIC {
        return None;
    }
    let header_len = u32::from_le_bytes(raw[4..8].try_into().ok()?) as usize;
    if raw.len() < 8 + header_len {
        return None;
    }
    let header: EntryHeader = serde_json::from_slice(&raw[8..8 + header_len]).ok()?;
    if header.format != ENTRY_FORMAT_VERSION {
        return None;
    }
    Some(header)
}

/// L2 cache statistics
#[derive(Debug, Clone)]
pub struct L2Stats {
    /// Current size in bytes
    pub size: u64,
    /// Byte ceiling
    pub capacity: u64,
    /// Number of entries
    pub entries: usize,
    /// Hit count
    pub hits: u64,
    /// Miss count
    pub misses: u64,
    /// Hit ratio (0.0 - 1.0)
    pub hit_ratio: f64,
    /// Eviction count
    pub evictions: u64,
    /// Expired purge count
    pub expirations: u64,
}

impl L2Cache {
    /// Get cache statistics
    pub fn stats(&self) -> L2Stats {
        L2Stats {
            size: self.size(),
            capacity: self.capacity(),
            entries: self.len(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyGenerator;
    use std::time::Duration;

    fn policy() -> NamespacePolicy {
        NamespacePolicy {
            compression: CompressionAlgorithm::Lz4,
            disk_ttl: Duration::from_secs(60),
            ..NamespacePolicy::default()
        }
    }

    fn make_key(namespace: &str, word: &str) -> CacheKey {
        KeyGenerator::derive(namespace, &word).unwrap()
    }

    fn open_cache(dir: &Path, capacity: u64) -> L2Cache {
        L2Cache::open(DiskConfig::at(dir).with_capacity(capacity)).unwrap()
    }

    #[test]
    fn test_put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path(), 1024 * 1024);

        let key = make_key("dictionary", "aardvark");
        let value = Bytes::from_static(b"a burrowing nocturnal mammal of southern Africa");
        cache.put(&key, &value, &policy()).unwrap();

        let entry = cache.get(&key).unwrap();
        assert_eq!(entry.value(), &value);
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn test_roundtrip_all_algorithms() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path(), 1024 * 1024);
        let value = Bytes::from(vec![42u8; 4096]);

        for algorithm in CompressionAlgorithm::available_algorithms() {
            let key = make_key("dictionary", &format!("entry-{algorithm}"));
            let p = NamespacePolicy {
                compression: algorithm,
                ..policy()
            };
            cache.put(&key, &value, &p).unwrap();
            assert_eq!(cache.get(&key).unwrap().value(), &value);
        }
    }

    #[test]
    fn test_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path(), 1024 * 1024);

        assert!(cache.get(&make_key("dictionary", "missing")).is_none());
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path(), 1024 * 1024);

        let key = make_key("dictionary", "aardvark");
        cache
            .put(&key, &Bytes::from_static(b"def"), &policy())
            .unwrap();

        assert!(cache.remove(&key));
        assert!(!cache.remove(&key));
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_expired_read_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path(), 1024 * 1024);

        let key = make_key("dictionary", "aardvark");
        let short = NamespacePolicy {
            disk_ttl: Duration::from_secs(1),
            ..policy()
        };
        cache
            .put(&key, &Bytes::from_static(b"def"), &short)
            .unwrap();

        std::thread::sleep(Duration::from_millis(1100));
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.expirations(), 1);
        // Lazily purged
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_corrupt_file_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path(), 1024 * 1024);

        let key = make_key("dictionary", "aardvark");
        cache
            .put(&key, &Bytes::from(vec![7u8; 2048]), &policy())
            .unwrap();

        // Flip payload bytes on disk
        let path = cache.entry_path(&key);
        let mut raw = std::fs::read(&path).unwrap();
        let len = raw.len();
        raw[len - 10..].iter_mut().for_each(|b| *b ^= 0xFF);
        std::fs::write(&path, &raw).unwrap();

        assert!(cache.get(&key).is_none());
        // Purged after the failed read
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_atomic_replace() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path(), 1024 * 1024);

        let key = make_key("dictionary", "aardvark");
        cache
            .put(&key, &Bytes::from_static(b"first definition"), &policy())
            .unwrap();
        cache
            .put(&key, &Bytes::from_static(b"second definition"), &policy())
            .unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get(&key).unwrap().value().as_ref(),
            b"second definition"
        );
    }

    #[test]
    fn test_capacity_ceiling_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path(), 8 * 1024);

        // Incompressible-ish payloads so the ceiling bites
        for i in 0..16 {
            let key = make_key("dictionary", &format!("entry-{i}"));
            let value: Vec<u8> = (0..1024).map(|j| ((i * 131 + j * 7) % 251) as u8).collect();
            let p = NamespacePolicy {
                compression: CompressionAlgorithm::None,
                ..policy()
            };
            cache.put(&key, &Bytes::from(value), &p).unwrap();
        }

        assert!(cache.size() <= cache.capacity());
        assert!(cache.evictions() > 0);
    }

    #[test]
    fn test_global_lru_eviction_order() {
        let dir = tempfile::tempdir().unwrap();
        // Fits roughly three 1 KiB entries
        let cache = open_cache(dir.path(), 3 * 1200);
        let p = NamespacePolicy {
            compression: CompressionAlgorithm::None,
            ..policy()
        };

        let a = make_key("dictionary", "a");
        let b = make_key("sessions", "b");
        let c = make_key("dictionary", "c");
        for key in [&a, &b, &c] {
            let value: Vec<u8> = (0..1024).map(|j| (j % 251) as u8).collect();
            cache.put(key, &Bytes::from(value), &p).unwrap();
        }

        // Touch a so b becomes globally least recent
        cache.get(&a);

        let d = make_key("dictionary", "d");
        let value: Vec<u8> = (0..1024).map(|j| (j % 241) as u8).collect();
        cache.put(&d, &Bytes::from(value), &p).unwrap();

        assert!(cache.contains(&a));
        assert!(!cache.contains(&b), "least-recently-accessed entry evicted");
        assert!(cache.contains(&d));
    }

    #[test]
    fn test_index_rebuild_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let key = make_key("dictionary", "aardvark");
        let value = Bytes::from_static(b"a burrowing mammal");

        {
            let cache = open_cache(dir.path(), 1024 * 1024);
            cache.put(&key, &value, &policy()).unwrap();
        }

        let reopened = open_cache(dir.path(), 1024 * 1024);
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get(&key).unwrap().value(), &value);
    }

    #[test]
    fn test_reopen_skips_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = open_cache(dir.path(), 1024 * 1024);
            cache
                .put(
                    &make_key("dictionary", "good"),
                    &Bytes::from_static(b"ok"),
                    &policy(),
                )
                .unwrap();
        }

        // Drop garbage alongside the good entry
        let ns_dir = dir.path().join("dictionary");
        std::fs::write(ns_dir.join("feedbeef.ent"), b"not an entry file").unwrap();

        let reopened = open_cache(dir.path(), 1024 * 1024);
        assert_eq!(reopened.len(), 1);
        assert!(!ns_dir.join("feedbeef.ent").exists());
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path(), 1024 * 1024);

        for i in 0..5 {
            cache
                .put(
                    &make_key("dictionary", &format!("w{i}")),
                    &Bytes::from_static(b"def"),
                    &policy(),
                )
                .unwrap();
        }
        assert_eq!(cache.len(), 5);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_stats() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path(), 1024 * 1024);

        let key = make_key("dictionary", "aardvark");
        cache
            .put(&key, &Bytes::from_static(b"def"), &policy())
            .unwrap();
        cache.get(&key);
        cache.get(&make_key("dictionary", "missing"));

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_ratio, 0.5);
        assert!(stats.size > 0);
    }
}
