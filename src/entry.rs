//! Cache entry type shared by the memory and disk tiers
//!
//! Entries hold the uncompressed serialized value bytes. Tiers own their
//! entries exclusively; backfilling a faster tier always copies, never
//! shares by reference.

use std::time::{Duration, Instant};

use bytes::Bytes;

/// A value held by the memory or disk tier
#[derive(Clone)]
pub struct CacheEntry {
    /// Serialized (uncompressed) value bytes
    value: Bytes,
    /// When the entry was inserted into this tier
    inserted_at: Instant,
    /// When the entry expires
    expires_at: Instant,
}

impl CacheEntry {
    /// Create an entry that expires `ttl` from now
    pub fn new(value: Bytes, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            inserted_at: now,
            expires_at: now + ttl,
        }
    }

    /// Entry value bytes (zero-copy)
    #[inline]
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Consume the entry, returning its bytes
    #[inline]
    pub fn into_value(self) -> Bytes {
        self.value
    }

    /// Value size in bytes
    #[inline]
    pub fn size(&self) -> usize {
        self.value.len()
    }

    /// When the entry was inserted
    #[inline]
    pub fn inserted_at(&self) -> Instant {
        self.inserted_at
    }

    /// When the entry expires
    #[inline]
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Check if the entry has expired
    #[inline]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("size", &self.size())
            .field("is_expired", &self.is_expired())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_holds_value() {
        let entry = CacheEntry::new(Bytes::from_static(b"hello"), Duration::from_secs(60));
        assert_eq!(entry.value().as_ref(), b"hello");
        assert_eq!(entry.size(), 5);
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_entry_expires() {
        let entry = CacheEntry::new(Bytes::from_static(b"x"), Duration::from_millis(10));
        assert!(!entry.is_expired());
        std::thread::sleep(Duration::from_millis(20));
        assert!(entry.is_expired());
    }

    #[test]
    fn test_entry_debug() {
        let entry = CacheEntry::new(Bytes::from_static(b"data"), Duration::from_secs(60));
        let debug = format!("{:?}", entry);
        assert!(debug.contains("CacheEntry"));
        assert!(debug.contains("size"));
    }

    #[test]
    fn test_clone_copies_value() {
        let entry = CacheEntry::new(Bytes::from_static(b"data"), Duration::from_secs(60));
        let cloned = entry.clone();
        assert_eq!(cloned.value(), entry.value());
        assert_eq!(cloned.expires_at(), entry.expires_at());
    }
}
