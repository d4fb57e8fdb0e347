//! Value (de)serialization
//!
//! Values cross tier boundaries as serialized bytes; the codec is the one
//! place that turns typed values into bytes and back. Corrupted input fails
//! with a decode error instead of yielding a partial value. Compression is
//! layered separately (the disk tier applies it per namespace policy, see
//! [`crate::compression`]).

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Serializes and deserializes cached values
#[derive(Debug, Default, Clone, Copy)]
pub struct Codec;

impl Codec {
    /// Create a codec
    pub fn new() -> Self {
        Self
    }

    /// Serialize a value to bytes
    pub fn serialize<T: Serialize>(&self, value: &T) -> Result<Bytes> {
        let raw = serde_json::to_vec(value).map_err(|e| Error::Decode {
            reason: format!("serialize: {e}"),
        })?;
        Ok(Bytes::from(raw))
    }

    /// Deserialize bytes back into a value
    pub fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| Error::Decode {
            reason: format!("deserialize: {e}"),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
