//! Versioned record types
//!
//! A [`VersionedRecord`] is the unit of truth for one logical resource.
//! Records form a per-resource chain linked by `supersedes` /
//! `superseded_by` digests, newest first, ordered by version number.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::ContentDigest;

/// Where the payload bytes of a record live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Small content embedded directly in the record
    Inline(Bytes),
    /// Large content stored as a separately addressed blob
    Blob(ContentDigest),
}

impl Payload {
    /// True if the payload is stored inline
    pub fn is_inline(&self) -> bool {
        matches!(self, Payload::Inline(_))
    }
}

/// Position of a record in its version chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Monotonic version number, 1 for the first write
    pub version_number: u64,
    /// When this version was committed
    pub created_at: DateTime<Utc>,
    /// Digest of the version this one replaced
    pub supersedes: Option<ContentDigest>,
    /// Digest of the version that replaced this one
    pub superseded_by: Option<ContentDigest>,
}

/// The unit of truth for a logical resource
#[derive(Debug, Clone)]
pub struct VersionedRecord {
    /// Identity of the payload bytes (pre-compression, pre-encoding)
    pub digest: ContentDigest,
    /// Inline bytes or blob reference
    pub payload: Payload,
    /// Chain position
    pub version: VersionInfo,
}

impl VersionedRecord {
    /// True if this record is the current chain head
    pub fn is_head(&self) -> bool {
        self.version.superseded_by.is_none()
    }

    /// True if this record started its chain
    pub fn is_first(&self) -> bool {
        self.version.supersedes.is_none()
    }
}

// =============================================================================
// Wire form
// =============================================================================

/// Serialized record shape exchanged with the backing store
///
/// The engine never hands backing-store types to callers; it converts
/// between [`VersionedRecord`] and this wire shape at the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    /// Hex content digest
    pub digest: ContentDigest,
    /// Inline payload bytes, when below the namespace inline threshold
    pub inline: Option<Vec<u8>>,
    /// Blob reference, when at or above the threshold
    pub blob: Option<ContentDigest>,
    /// Version number
    pub version_number: u64,
    /// Commit timestamp
    pub created_at: DateTime<Utc>,
    /// Digest of the superseded version
    pub supersedes: Option<ContentDigest>,
    /// Digest of the superseding version
    pub superseded_by: Option<ContentDigest>,
}

impl RawRecord {
    /// Build the wire form of a record
    pub fn from_record(record: &VersionedRecord) -> Self {
        let (inline, blob) = match &record.payload {
            Payload::Inline(bytes) => (Some(bytes.to_vec()), None),
            Payload::Blob(digest) => (None, Some(*digest)),
        };
        Self {
            digest: record.digest,
            inline,
            blob,
            version_number: record.version.version_number,
            created_at: record.version.created_at,
            supersedes: record.version.supersedes,
            superseded_by: record.version.superseded_by,
        }
    }

    /// Reconstruct a record, without payload bytes for blob records
    ///
    /// Blob payloads are fetched separately; callers resolve them through
    /// the backing store before verification.
    pub fn into_record(self) -> VersionedRecord {
        let payload = match (self.inline, self.blob) {
            (Some(bytes), _) => Payload::Inline(Bytes::from(bytes)),
            (None, Some(digest)) => Payload::Blob(digest),
            // A record with neither field is treated as an empty inline
            // payload; digest verification will flag it if that is wrong
            (None, None) => Payload::Inline(Bytes::new()),
        };
        VersionedRecord {
            digest: self.digest,
            payload,
            version: VersionInfo {
                version_number: self.version_number,
                created_at: self.created_at,
                supersedes: self.supersedes,
                superseded_by: self.superseded_by,
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
