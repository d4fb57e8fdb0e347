//! Error types for the stratacache engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the cache engine
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Key derivation failed because the input cannot be serialized
    #[error("unhashable cache key input: {reason}")]
    UnhashableInput { reason: String },

    /// Serialized value could not be decoded back into its type
    #[error("decode failed: {reason}")]
    Decode { reason: String },

    /// Unknown namespace (not present in the registry)
    #[error("unknown namespace: {0}")]
    UnknownNamespace(String),

    /// Namespace configuration rejected at load time
    #[error("configuration error: {0}")]
    Config(String),

    // =========================================================================
    // Compression Errors
    // =========================================================================
    /// Compression failed
    #[error("compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    // =========================================================================
    // Versioned Store Errors
    // =========================================================================
    /// Stored digest does not match the recomputed digest of the payload
    #[error("corruption detected for {key}: stored digest {stored}, computed {computed}")]
    CorruptionDetected {
        key: String,
        stored: String,
        computed: String,
    },

    /// Backing store (or disk tier) is unreachable
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Optimistic-concurrency commit lost the race too many times
    #[error("write conflict on {key} after {attempts} attempts")]
    WriteConflict { key: String, attempts: u32 },

    // =========================================================================
    // Loader Errors
    // =========================================================================
    /// The caller-supplied loader failed; nothing left to fall back to
    #[error("loader failed: {0}")]
    Loader(String),
}

impl Error {
    /// True when a tier-local failure should degrade to a miss rather than
    /// fail the request (some other tier or the loader can still serve it).
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            Error::Decode { .. }
                | Error::DecompressionFailed { .. }
                | Error::CorruptionDetected { .. }
                | Error::BackendUnavailable(_)
                | Error::Io(_)
        )
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degradable_errors() {
        assert!(Error::Decode {
            reason: "bad json".into()
        }
        .is_degradable());
        assert!(Error::BackendUnavailable("down".into()).is_degradable());
        assert!(Error::CorruptionDetected {
            key: "k".into(),
            stored: "aa".into(),
            computed: "bb".into(),
        }
        .is_degradable());

        assert!(!Error::Loader("boom".into()).is_degradable());
        assert!(!Error::WriteConflict {
            key: "k".into(),
            attempts: 5
        }
        .is_degradable());
        assert!(!Error::UnknownNamespace("nope".into()).is_degradable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::WriteConflict {
            key: "dictionary:abc".into(),
            attempts: 5,
        };
        assert_eq!(
            err.to_string(),
            "write conflict on dictionary:abc after 5 attempts"
        );
    }
}
