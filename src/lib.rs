//! stratacache - Multi-Tier Cache and Versioned Storage Engine
//!
//! A three-tier cache with content-addressable versioned storage fronting a
//! slow authoritative backing store.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          Cache Manager                               │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  L1 (Memory)         │  L2 (Disk)           │  L3 (Versioned Store)  │
//! │  ┌────────────────┐  │  ┌────────────────┐  │  ┌──────────────────┐  │
//! │  │ Per-namespace  │  │  │ File-per-entry │  │  │ Version chains   │  │
//! │  │ LRU + TTL      │  │  │ Compressed     │  │  │ SHA-256 dedup    │  │
//! │  │                │  │  │ Global cap     │  │  │ Backing store    │  │
//! │  └────────────────┘  │  └────────────────┘  │  └──────────────────┘  │
//! │          │           ┌─────────┘                      │              │
//! │          └───────────┴──────────┬─────────────────────┘              │
//! │                                 │                                    │
//! │            Single-Flight Loader Coordination                         │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reads fall through L1 → L2 → L3 → loader, backfilling faster tiers on
//! the way back up. Writes go through the versioned store first (source of
//! truth), then refresh the faster tiers. Concurrent loads of the same
//! uncached key share a single loader invocation.
//!
//! # Namespaces
//!
//! Every key lives in a namespace with its own capacity, TTLs, compression
//! algorithm, and inline threshold, configured once at startup in a
//! [`config::NamespaceRegistry`].
//!
//! # Modules
//!
//! - [`codec`] - value (de)serialization
//! - [`compression`] - per-namespace compression algorithms
//! - [`config`] - namespace policies and engine configuration
//! - [`digest`] - SHA-256 content digests
//! - [`entry`] - cache entry type for the fast tiers
//! - [`error`] - error taxonomy
//! - [`key`] - deterministic cache key derivation
//! - [`l1`] - memory tier
//! - [`l2`] - disk tier
//! - [`manager`] - the tiered facade
//! - [`metrics`] - request-path counters
//! - [`singleflight`] - loader coalescing
//! - [`store`] - content-addressable versioned store
//! - [`wrapper`] - call-site caching wrappers

pub mod codec;
pub mod compression;
pub mod config;
pub mod digest;
pub mod entry;
pub mod error;
pub mod key;
pub mod l1;
pub mod l2;
pub mod manager;
pub mod metrics;
pub mod singleflight;
pub mod store;
pub mod wrapper;

// Re-export commonly used types
pub use codec::Codec;
pub use compression::{CompressionAlgorithm, CompressionManager, Compressor};
pub use config::{DiskConfig, ManagerConfig, NamespacePolicy, NamespaceRegistry};
pub use digest::ContentDigest;
pub use entry::CacheEntry;
pub use error::{Error, Result};
pub use key::{CacheKey, KeyGenerator};
pub use l1::L1Cache;
pub use l2::L2Cache;
pub use manager::{CacheManager, CacheTier};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use singleflight::SingleFlight;
pub use store::{
    CommitOutcome, InMemoryBackend, Payload, RawRecord, StorageBackend, VersionInfo,
    VersionedRecord, VersionedStore,
};
pub use wrapper::{cached, coalesced, NamespaceHandle};

// =============================================================================
// Tests
// =============================================================================
