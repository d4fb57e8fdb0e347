//! Namespace policies and engine configuration
//!
//! Every cache key lives in a namespace, and every namespace carries its own
//! policy: L1 capacity, L1/L2 TTLs, compression algorithm, and the inline
//! threshold for the versioned store. Policies are collected into a
//! [`NamespaceRegistry`] that is built once at process start, validated at
//! load time, and read-only thereafter.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::compression::CompressionAlgorithm;
use crate::error::{Error, Result};

/// Default disk tier byte ceiling (10 GiB)
pub const DEFAULT_DISK_CAPACITY: u64 = 10 * 1024 * 1024 * 1024;

/// Default bound on optimistic-commit retries in the versioned store
pub const DEFAULT_MAX_COMMIT_RETRIES: u32 = 5;

// =============================================================================
// Namespace Policy
// =============================================================================

/// Immutable per-namespace configuration
#[derive(Debug, Clone)]
pub struct NamespacePolicy {
    /// Maximum number of entries in the memory tier
    pub memory_capacity: usize,
    /// Time-to-live for memory tier entries
    pub memory_ttl: Duration,
    /// Time-to-live for disk tier entries
    pub disk_ttl: Duration,
    /// Compression algorithm for this namespace (never varied per call)
    pub compression: CompressionAlgorithm,
    /// Payloads strictly below this size are stored inline in versioned
    /// records; at or above it they become separately addressed blobs
    pub inline_threshold_bytes: usize,
}

impl Default for NamespacePolicy {
    fn default() -> Self {
        Self {
            memory_capacity: 1_000,
            memory_ttl: Duration::from_secs(300),
            disk_ttl: Duration::from_secs(3_600),
            compression: CompressionAlgorithm::Lz4,
            inline_threshold_bytes: 16 * 1024,
        }
    }
}

impl NamespacePolicy {
    fn validate(&self, namespace: &str) -> Result<()> {
        if self.memory_capacity == 0 {
            return Err(Error::Config(format!(
                "namespace {namespace}: memory_capacity must be nonzero"
            )));
        }
        if self.memory_ttl.is_zero() {
            return Err(Error::Config(format!(
                "namespace {namespace}: memory_ttl must be nonzero"
            )));
        }
        if self.disk_ttl.is_zero() {
            return Err(Error::Config(format!(
                "namespace {namespace}: disk_ttl must be nonzero"
            )));
        }
        Ok(())
    }
}

/// Raw policy shape as it appears in configuration files
#[derive(Debug, Clone, Deserialize)]
struct PolicySpec {
    memory_capacity: usize,
    memory_ttl_secs: u64,
    disk_ttl_secs: u64,
    compression: String,
    inline_threshold_bytes: usize,
}

impl PolicySpec {
    fn into_policy(self, namespace: &str) -> Result<NamespacePolicy> {
        let compression = CompressionAlgorithm::parse(&self.compression).ok_or_else(|| {
            Error::Config(format!(
                "namespace {namespace}: unknown compression algorithm {:?}",
                self.compression
            ))
        })?;

        Ok(NamespacePolicy {
            memory_capacity: self.memory_capacity,
            memory_ttl: Duration::from_secs(self.memory_ttl_secs),
            disk_ttl: Duration::from_secs(self.disk_ttl_secs),
            compression,
            inline_threshold_bytes: self.inline_threshold_bytes,
        })
    }
}

// =============================================================================
// Namespace Registry
// =============================================================================

/// Process-wide table of namespace policies
///
/// Built once at startup and read-only afterwards, so lookups take no lock.
/// Pass it by `Arc` to every component that needs it; there is no ambient
/// global instance.
#[derive(Debug, Default)]
pub struct NamespaceRegistry {
    policies: HashMap<String, NamespacePolicy>,
}

impl NamespaceRegistry {
    /// Build a registry from explicit (namespace, policy) pairs
    pub fn new<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, NamespacePolicy)>,
    {
        let mut policies = HashMap::new();
        for (namespace, policy) in entries {
            policy.validate(&namespace)?;
            if policies.insert(namespace.clone(), policy).is_some() {
                return Err(Error::Config(format!(
                    "namespace {namespace} configured twice"
                )));
            }
        }
        Ok(Self { policies })
    }

    /// Load a registry from a JSON document mapping namespace to policy
    ///
    /// ```json
    /// {
    ///   "dictionary": {
    ///     "memory_capacity": 5000,
    ///     "memory_ttl_secs": 300,
    ///     "disk_ttl_secs": 86400,
    ///     "compression": "zstd",
    ///     "inline_threshold_bytes": 16384
    ///   }
    /// }
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self> {
        let specs: HashMap<String, PolicySpec> =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;

        let mut entries = Vec::with_capacity(specs.len());
        for (namespace, spec) in specs {
            let policy = spec.into_policy(&namespace)?;
            entries.push((namespace, policy));
        }
        Self::new(entries)
    }

    /// Get the policy for a namespace
    pub fn policy(&self, namespace: &str) -> Result<&NamespacePolicy> {
        self.policies
            .get(namespace)
            .ok_or_else(|| Error::UnknownNamespace(namespace.to_string()))
    }

    /// True if the namespace is configured
    pub fn contains(&self, namespace: &str) -> bool {
        self.policies.contains_key(namespace)
    }

    /// Iterate configured namespaces
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    /// Number of configured namespaces
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// True if no namespace is configured
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

// =============================================================================
// Tier / Manager Configuration
// =============================================================================

/// Disk tier configuration
#[derive(Debug, Clone)]
pub struct DiskConfig {
    /// Root directory for entry files
    pub root: PathBuf,
    /// Total byte ceiling shared across all namespaces
    pub capacity_bytes: u64,
}

impl DiskConfig {
    /// Disk tier rooted at the given directory with the default ceiling
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            capacity_bytes: DEFAULT_DISK_CAPACITY,
        }
    }

    /// Override the byte ceiling
    pub fn with_capacity(mut self, capacity_bytes: u64) -> Self {
        self.capacity_bytes = capacity_bytes;
        self
    }
}

/// Cache manager configuration
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Timeout for a single disk tier access before it is treated as a miss
    pub disk_timeout: Duration,
    /// Timeout for a single versioned-store access before it is treated as a
    /// miss (reads only; writes surface their errors)
    pub store_timeout: Duration,
    /// Bound on optimistic-commit retries in the versioned store
    pub max_commit_retries: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            disk_timeout: Duration::from_millis(250),
            store_timeout: Duration::from_secs(5),
            max_commit_retries: DEFAULT_MAX_COMMIT_RETRIES,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> NamespacePolicy {
        NamespacePolicy::default()
    }

    #[test]
    fn test_registry_lookup() {
        let registry = NamespaceRegistry::new(vec![
            ("dictionary".to_string(), policy()),
            ("sessions".to_string(), policy()),
        ])
        .unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("dictionary"));
        assert!(registry.policy("dictionary").is_ok());
        assert!(matches!(
            registry.policy("unknown"),
            Err(Error::UnknownNamespace(_))
        ));
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let result = NamespaceRegistry::new(vec![
            ("dictionary".to_string(), policy()),
            ("dictionary".to_string(), policy()),
        ]);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let bad = NamespacePolicy {
            memory_capacity: 0,
            ..policy()
        };
        let result = NamespaceRegistry::new(vec![("dictionary".to_string(), bad)]);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let bad = NamespacePolicy {
            memory_ttl: Duration::ZERO,
            ..policy()
        };
        assert!(NamespaceRegistry::new(vec![("x".to_string(), bad)]).is_err());

        let bad = NamespacePolicy {
            disk_ttl: Duration::ZERO,
            ..policy()
        };
        assert!(NamespaceRegistry::new(vec![("x".to_string(), bad)]).is_err());
    }

    #[test]
    fn test_load_from_json() {
        let json = r#"{
            "dictionary": {
                "memory_capacity": 5000,
                "memory_ttl_secs": 300,
                "disk_ttl_secs": 86400,
                "compression": "zstd",
                "inline_threshold_bytes": 16384
            },
            "lookup_results": {
                "memory_capacity": 200,
                "memory_ttl_secs": 60,
                "disk_ttl_secs": 600,
                "compression": "none",
                "inline_threshold_bytes": 4096
            }
        }"#;

        let registry = NamespaceRegistry::from_json_str(json).unwrap();
        assert_eq!(registry.len(), 2);

        let dict = registry.policy("dictionary").unwrap();
        assert_eq!(dict.memory_capacity, 5000);
        assert_eq!(dict.compression, CompressionAlgorithm::Zstd);
        assert_eq!(dict.disk_ttl, Duration::from_secs(86400));
    }

    #[test]
    fn test_unknown_algorithm_rejected_at_load() {
        let json = r#"{
            "dictionary": {
                "memory_capacity": 10,
                "memory_ttl_secs": 60,
                "disk_ttl_secs": 600,
                "compression": "snappy",
                "inline_threshold_bytes": 4096
            }
        }"#;
        assert!(matches!(
            NamespaceRegistry::from_json_str(json),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_disk_config_builder() {
        let config = DiskConfig::at("/tmp/cache").with_capacity(1024 * 1024);
        assert_eq!(config.capacity_bytes, 1024 * 1024);
        assert_eq!(config.root, PathBuf::from("/tmp/cache"));
    }
}
