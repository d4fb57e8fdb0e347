//! Cache key derivation
//!
//! A [`CacheKey`] is derived deterministically from a namespace and the
//! logical call signature: the signature is serialized to a canonical form
//! (map keys sorted recursively, stable number formatting) and hashed with
//! SHA-256. Semantically equal inputs always derive equal keys, regardless
//! of map ordering in the caller's representation, and keys are stable
//! across process restarts.
//!
//! The string form is `namespace:hexdigest`, which keeps keys
//! human-inspectable in logs and on disk.

use serde::Serialize;
use serde_json::Value;

use crate::digest::ContentDigest;
use crate::error::{Error, Result};

// =============================================================================
// Cache Key
// =============================================================================

/// Deterministic, collision-resistant cache key
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: String,
    digest: ContentDigest,
}

impl CacheKey {
    /// Get the namespace
    #[inline]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Get the signature digest
    #[inline]
    pub fn digest(&self) -> &ContentDigest {
        &self.digest
    }

    /// Hex digest portion, used as the disk tier file stem
    pub fn digest_hex(&self) -> String {
        self.digest.to_hex()
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.namespace, self.digest.to_hex())
    }
}

impl std::fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CacheKey({}:{}..)", self.namespace, &self.digest.to_hex()[..12])
    }
}

// =============================================================================
// Key Generator
// =============================================================================

/// Derives cache keys from logical call signatures
pub struct KeyGenerator;

impl KeyGenerator {
    /// Derive the cache key for a call signature in a namespace
    ///
    /// Pure and deterministic. Fails only when the signature cannot be
    /// serialized (e.g. a map with non-string keys).
    pub fn derive<S: Serialize + ?Sized>(namespace: &str, signature: &S) -> Result<CacheKey> {
        let value = serde_json::to_value(signature).map_err(|e| Error::UnhashableInput {
            reason: e.to_string(),
        })?;

        let mut canonical = String::new();
        write_canonical(&value, &mut canonical);

        Ok(CacheKey {
            namespace: namespace.to_string(),
            digest: ContentDigest::of(canonical.as_bytes()),
        })
    }
}

/// Write a JSON value in canonical form: object keys sorted, no whitespace,
/// serde_json's stable scalar formatting.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Object keys are strings; reuse serde_json's escaping
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

// =============================================================================
// Tests
// =============================================================================
