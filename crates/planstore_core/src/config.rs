//! Configuration types for a planstore storage root.

use crate::context::ProjectId;
use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Name of the configuration file at the storage root.
pub const CONFIG_FILE: &str = "planstore.toml";

/// Comprehensive configuration for a storage root.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StoreConfig {
    /// Storage-related configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Lock manager configuration.
    #[serde(default)]
    pub locks: LockConfig,

    /// Index cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Defaults for new plans' history settings.
    #[serde(default)]
    pub history: HistoryConfig,
}

impl StoreConfig {
    /// Load configuration from `<root>/planstore.toml`, falling back to defaults.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        let config: Self = if path.exists() {
            let content = fs::read_to_string(&path)
                .map_err(|e| StoreError::Config(format!("failed to read config: {}", e)))?;
            toml::from_str(&content)
                .map_err(|e| StoreError::Config(format!("failed to parse config: {}", e)))?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to `<root>/planstore.toml`.
    pub fn save(&self, root: &Path) -> Result<()> {
        let path = root.join(CONFIG_FILE);
        let content = toml::to_string_pretty(self)
            .map_err(|e| StoreError::Config(format!("failed to serialize config: {}", e)))?;
        fs::create_dir_all(root)
            .map_err(|e| StoreError::Config(format!("failed to create root: {}", e)))?;
        fs::write(&path, content)
            .map_err(|e| StoreError::Config(format!("failed to write config: {}", e)))?;
        Ok(())
    }

    /// Rejects values the engine cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if let Some(project) = &self.storage.default_project {
            ProjectId::parse(project)
                .map_err(|e| StoreError::Config(format!("storage.default_project: {}", e)))?;
        }
        if self.cache.enabled && self.cache.max_size == 0 {
            return Err(StoreError::Config(
                "cache.max_size must be positive when the cache is enabled".to_string(),
            ));
        }
        if self.locks.timeout_ms == 0 {
            return Err(StoreError::Config(
                "locks.timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Storage-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Project used when no execution-context scope is active.
    /// `None` stores plans directly under the root.
    pub default_project: Option<String>,
}

/// Lock manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LockConfig {
    /// How long a writer waits for a contended key (default: 5000).
    pub timeout_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self { timeout_ms: 5_000 }
    }
}

impl LockConfig {
    /// Returns the timeout as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// How cached index entries go stale.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheInvalidation {
    /// Entries older than `ttl_ms` are misses.
    #[default]
    Ttl,
    /// Entries whose version differs from the caller's are misses.
    Version,
}

/// Index cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the cache (default: true).
    pub enabled: bool,
    /// Entry lifetime in milliseconds for `ttl` invalidation (default: 5 minutes).
    pub ttl_ms: u64,
    /// Maximum cached entries per index (default: 1000).
    pub max_size: usize,
    /// Staleness policy (default: ttl).
    pub invalidation: CacheInvalidation,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: 5 * 60 * 1000,
            max_size: 1_000,
            invalidation: CacheInvalidation::Ttl,
        }
    }
}

/// Defaults applied to plans created without explicit history settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HistoryConfig {
    /// Whether new plans record history (default: true).
    pub enabled_by_default: bool,
    /// Snapshots kept per entity, 0 for unlimited (default: 5).
    pub max_depth_default: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled_by_default: true,
            max_depth_default: 5,
        }
    }
}
