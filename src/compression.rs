//! Cache Compression Support
//!
//! Compression is selected per namespace by [`crate::config::NamespacePolicy`],
//! never per call. The algorithm actually used is recorded alongside each
//! stored entry so reads always decompress with the right one.
//!
//! # Example
//!
//! ```
//! use stratacache::compression::{CompressionAlgorithm, CompressionManager};
//!
//! let manager = CompressionManager::new();
//!
//! let data = b"Hello, this is test data that should compress well!";
//! let compressed = manager.compress(data, CompressionAlgorithm::Lz4).unwrap();
//! let decompressed = manager
//!     .decompress(&compressed, CompressionAlgorithm::Lz4)
//!     .unwrap();
//! assert_eq!(decompressed.as_ref(), data);
//! ```

use std::io::{Read, Write};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// =============================================================================
// Compression Algorithm
// =============================================================================

/// Supported compression algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// No compression
    None,
    /// LZ4 - fast compression
    Lz4,
    /// Zstandard - balanced ratio and speed
    Zstd,
    /// Gzip - widely compatible
    Gzip,
}

impl CompressionAlgorithm {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Lz4 => "lz4",
            CompressionAlgorithm::Zstd => "zstd",
            CompressionAlgorithm::Gzip => "gzip",
        }
    }

    /// Parse an algorithm from its configuration name
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "none" => Some(Self::None),
            "lz4" => Some(Self::Lz4),
            "zstd" => Some(Self::Zstd),
            "gzip" => Some(Self::Gzip),
            _ => None,
        }
    }

    /// Get list of available algorithms
    pub fn available_algorithms() -> Vec<Self> {
        vec![Self::None, Self::Lz4, Self::Zstd, Self::Gzip]
    }
}

impl Default for CompressionAlgorithm {
    fn default() -> Self {
        CompressionAlgorithm::Lz4
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Compressor Trait
// =============================================================================

/// Trait for compression implementations
pub trait Compressor: Send + Sync {
    /// Get the algorithm identifier
    fn algorithm(&self) -> CompressionAlgorithm;

    /// Compress data
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress data
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

// =============================================================================
// No-Op Compressor
// =============================================================================

/// Pass-through compressor (no compression)
pub struct NoopCompressor;

impl Compressor for NoopCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::None
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

// =============================================================================
// LZ4 Compressor
// =============================================================================

/// LZ4 compressor (fast compression)
pub struct Lz4Compressor {
    level: i32,
}

impl Lz4Compressor {
    /// Create new LZ4 compressor with default settings
    pub fn new() -> Self {
        Self { level: 4 }
    }

    /// Create with custom compression level
    pub fn with_level(level: i32) -> Self {
        Self { level }
    }
}

impl Default for Lz4Compressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for Lz4Compressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Lz4
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::compress(
            data,
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(self.level)),
            true,
        )
        .map_err(|e| Error::CompressionFailed {
            algorithm: "lz4".into(),
            reason: e.to_string(),
        })
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::decompress(data, None).map_err(|e| Error::DecompressionFailed {
            algorithm: "lz4".into(),
            reason: e.to_string(),
        })
    }
}

// =============================================================================
// Zstd Compressor
// =============================================================================

/// Zstandard compressor (balanced ratio/speed)
pub struct ZstdCompressor {
    level: i32,
}

impl ZstdCompressor {
    /// Create with the default level
    pub fn new() -> Self {
        Self { level: 3 }
    }

    /// Create with custom compression level
    pub fn with_level(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for ZstdCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Zstd
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::encode_all(data, self.level).map_err(|e| Error::CompressionFailed {
            algorithm: "zstd".into(),
            reason: e.to_string(),
        })
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::decode_all(data).map_err(|e| Error::DecompressionFailed {
            algorithm: "zstd".into(),
            reason: e.to_string(),
        })
    }
}

// =============================================================================
// Gzip Compressor
// =============================================================================

/// Gzip compressor via flate2
pub struct GzipCompressor {
    level: u32,
}

impl GzipCompressor {
    /// Create with the default level
    pub fn new() -> Self {
        Self { level: 6 }
    }

    /// Create with custom compression level (0-9)
    pub fn with_level(level: u32) -> Self {
        Self { level }
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for GzipCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Gzip
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = flate2::write::GzEncoder::new(
            Vec::with_capacity(data.len() / 2),
            flate2::Compression::new(self.level),
        );
        encoder.write_all(data).map_err(|e| Error::CompressionFailed {
            algorithm: "gzip".into(),
            reason: e.to_string(),
        })?;
        encoder.finish().map_err(|e| Error::CompressionFailed {
            algorithm: "gzip".into(),
            reason: e.to_string(),
        })
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = flate2::read::GzDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| Error::DecompressionFailed {
                algorithm: "gzip".into(),
                reason: e.to_string(),
            })?;
        Ok(out)
    }
}

// =============================================================================
// Compression Manager
// =============================================================================

/// Manager routing compression operations to the configured algorithm
pub struct CompressionManager {
    noop: NoopCompressor,
    lz4: Lz4Compressor,
    zstd: ZstdCompressor,
    gzip: GzipCompressor,
}

impl CompressionManager {
    /// Create a new compression manager with default levels
    pub fn new() -> Self {
        Self {
            noop: NoopCompressor,
            lz4: Lz4Compressor::new(),
            zstd: ZstdCompressor::new(),
            gzip: GzipCompressor::new(),
        }
    }

    /// Get compressor for algorithm
    fn compressor(&self, algorithm: CompressionAlgorithm) -> &dyn Compressor {
        match algorithm {
            CompressionAlgorithm::None => &self.noop,
            CompressionAlgorithm::Lz4 => &self.lz4,
            CompressionAlgorithm::Zstd => &self.zstd,
            CompressionAlgorithm::Gzip => &self.gzip,
        }
    }

    /// Compress data with the given algorithm
    pub fn compress(&self, data: &[u8], algorithm: CompressionAlgorithm) -> Result<Bytes> {
        let compressed = self.compressor(algorithm).compress(data)?;
        Ok(Bytes::from(compressed))
    }

    /// Decompress data that was compressed with the given algorithm
    ///
    /// Corrupted or truncated input fails with `DecompressionFailed` rather
    /// than returning a partial value.
    pub fn decompress(&self, data: &[u8], algorithm: CompressionAlgorithm) -> Result<Bytes> {
        let decompressed = self.compressor(algorithm).decompress(data)?;
        Ok(Bytes::from(decompressed))
    }
}

impl Default for CompressionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_DATA: &[u8] = b"Hello, this is test data that should compress well. \
        It has some repetition: Hello, this is test data that should compress well.";

    #[test]
    fn test_lz4_roundtrip() {
        let compressor = Lz4Compressor::new();

        let compressed = compressor.compress(TEST_DATA).unwrap();
        assert!(compressed.len() < TEST_DATA.len());

        let decompressed = compressor.decompress(&compressed).unwrap();
        assert_eq!(decompressed, TEST_DATA);
    }

    #[test]
    fn test_zstd_roundtrip() {
        let compressor = ZstdCompressor::new();

        let compressed = compressor.compress(TEST_DATA).unwrap();
        assert!(compressed.len() < TEST_DATA.len());

        let decompressed = compressor.decompress(&compressed).unwrap();
        assert_eq!(decompressed, TEST_DATA);
    }

    #[test]
    fn test_gzip_roundtrip() {
        let compressor = GzipCompressor::new();

        let compressed = compressor.compress(TEST_DATA).unwrap();
        let decompressed = compressor.decompress(&compressed).unwrap();
        assert_eq!(decompressed, TEST_DATA);
    }

    #[test]
    fn test_noop_roundtrip() {
        let compressor = NoopCompressor;

        let compressed = compressor.compress(TEST_DATA).unwrap();
        assert_eq!(compressed, TEST_DATA);

        let decompressed = compressor.decompress(&compressed).unwrap();
        assert_eq!(decompressed, TEST_DATA);
    }

    #[test]
    fn test_manager_roundtrip_all_algorithms() {
        let manager = CompressionManager::new();

        for algorithm in CompressionAlgorithm::available_algorithms() {
            let compressed = manager.compress(TEST_DATA, algorithm).unwrap();
            let decompressed = manager.decompress(&compressed, algorithm).unwrap();
            assert_eq!(
                decompressed.as_ref(),
                TEST_DATA,
                "roundtrip failed for {}",
                algorithm
            );
        }
    }

    #[test]
    fn test_corrupt_input_is_an_error() {
        let manager = CompressionManager::new();
        let garbage = b"\x00\x01\x02\x03 definitely not a compressed frame";

        for algorithm in [
            CompressionAlgorithm::Zstd,
            CompressionAlgorithm::Gzip,
        ] {
            let result = manager.decompress(garbage, algorithm);
            assert!(result.is_err(), "expected decode failure for {}", algorithm);
        }
    }

    #[test]
    fn test_truncated_input_is_an_error() {
        let manager = CompressionManager::new();

        let compressed = manager
            .compress(TEST_DATA, CompressionAlgorithm::Gzip)
            .unwrap();
        let truncated = &compressed[..compressed.len() / 2];
        assert!(manager
            .decompress(truncated, CompressionAlgorithm::Gzip)
            .is_err());
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!(CompressionAlgorithm::None.name(), "none");
        assert_eq!(CompressionAlgorithm::Lz4.name(), "lz4");
        assert_eq!(CompressionAlgorithm::Zstd.name(), "zstd");
        assert_eq!(CompressionAlgorithm::Gzip.name(), "gzip");
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!(
            CompressionAlgorithm::parse("zstd"),
            Some(CompressionAlgorithm::Zstd)
        );
        assert_eq!(CompressionAlgorithm::parse("snappy"), None);
    }

    #[test]
    fn test_available_algorithms() {
        let algs = CompressionAlgorithm::available_algorithms();
        assert_eq!(algs.len(), 4);
        assert!(algs.contains(&CompressionAlgorithm::None));
        assert!(algs.contains(&CompressionAlgorithm::Lz4));
        assert!(algs.contains(&CompressionAlgorithm::Zstd));
        assert!(algs.contains(&CompressionAlgorithm::Gzip));
    }

    #[test]
    fn test_incompressible_data_still_roundtrips() {
        let manager = CompressionManager::new();
        let random_data: Vec<u8> = (0..2000).map(|i| (i * 7 + 3) as u8).collect();

        for algorithm in CompressionAlgorithm::available_algorithms() {
            let compressed = manager.compress(&random_data, algorithm).unwrap();
            let decompressed = manager.decompress(&compressed, algorithm).unwrap();
            assert_eq!(decompressed.as_ref(), random_data.as_slice());
        }
    }
}
