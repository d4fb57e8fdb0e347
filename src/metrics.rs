//! Cache Metrics Collection
//!
//! Counters for tier traffic and degraded paths, collected by the manager.
//! The tiers also keep their own local counters; these track what the
//! request path observed.

use std::sync::atomic::{AtomicU64, Ordering};

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // Per-tier traffic as seen by the request path
    l1_hits: AtomicU64,
    l1_misses: AtomicU64,
    l2_hits: AtomicU64,
    l2_misses: AtomicU64,
    l3_hits: AtomicU64,
    l3_misses: AtomicU64,

    // Loader traffic
    loads: AtomicU64,
    load_failures: AtomicU64,

    // Write path
    writes: AtomicU64,
    invalidations: AtomicU64,

    // Degraded paths
    decode_drops: AtomicU64,
    tier_timeouts: AtomicU64,
    tier_errors: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_l1_hit(&self) {
        self.l1_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l1_miss(&self) {
        self.l1_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l2_hit(&self) {
        self.l2_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l2_miss(&self) {
        self.l2_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l3_hit(&self) {
        self.l3_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l3_miss(&self) {
        self.l3_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load_failure(&self) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// An entry that failed to decode and was dropped from its tier
    pub fn record_decode_drop(&self) {
        self.decode_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// A tier access that timed out and was treated as a miss
    pub fn record_tier_timeout(&self) {
        self.tier_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// A tier access that failed and degraded to a miss
    pub fn record_tier_error(&self) {
        self.tier_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn l1_hits(&self) -> u64 {
        self.l1_hits.load(Ordering::Relaxed)
    }

    pub fn l2_hits(&self) -> u64 {
        self.l2_hits.load(Ordering::Relaxed)
    }

    pub fn l3_hits(&self) -> u64 {
        self.l3_hits.load(Ordering::Relaxed)
    }

    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Get a point-in-time snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            l1_hits: self.l1_hits.load(Ordering::Relaxed),
            l1_misses: self.l1_misses.load(Ordering::Relaxed),
            l2_hits: self.l2_hits.load(Ordering::Relaxed),
            l2_misses: self.l2_misses.load(Ordering::Relaxed),
            l3_hits: self.l3_hits.load(Ordering::Relaxed),
            l3_misses: self.l3_misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            decode_drops: self.decode_drops.load(Ordering::Relaxed),
            tier_timeouts: self.tier_timeouts.load(Ordering::Relaxed),
            tier_errors: self.tier_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the metrics counters
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub l1_hits: u64,
    pub l1_misses: u64,
    pub l2_hits: u64,
    pub l2_misses: u64,
    pub l3_hits: u64,
    pub l3_misses: u64,
    pub loads: u64,
    pub load_failures: u64,
    pub writes: u64,
    pub invalidations: u64,
    pub decode_drops: u64,
    pub tier_timeouts: u64,
    pub tier_errors: u64,
}

impl MetricsSnapshot {
    /// Overall hit ratio across all tiers
    pub fn hit_ratio(&self) -> f64 {
        let hits = (self.l1_hits + self.l2_hits + self.l3_hits) as f64;
        let total = hits + self.loads as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
