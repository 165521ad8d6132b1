//! Engine configuration
//!
//! Loaded from JSON (every field optional) and then overridden by `RIGHTGATE_*`
//! environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{config_err, AclError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionCacheConfig {
    /// Number of target buckets kept
    pub max_targets: usize,
    /// Number of grantee entries per target bucket
    pub max_grantees_per_target: usize,
    /// Buckets older than this are reset on access
    pub bucket_ttl_secs: Option<u64>,
    pub enabled: bool,
}

impl Default for PermissionCacheConfig {
    fn default() -> Self {
        Self {
            max_targets: DEFAULT_PERM_CACHE_TARGETS,
            max_grantees_per_target: DEFAULT_PERM_CACHE_GRANTEES,
            bucket_ttl_secs: None,
            enabled: true,
        }
    }
}

impl PermissionCacheConfig {
    #[inline]
    pub fn bucket_ttl(&self) -> Option<Duration> {
        self.bucket_ttl_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GranteeCacheConfig {
    pub capacity: usize,
    pub ttl_secs: u64,
}

impl Default for GranteeCacheConfig {
    fn default() -> Self {
        Self { capacity: DEFAULT_GRANTEE_CACHE_SIZE, ttl_secs: DEFAULT_GRANTEE_CACHE_TTL_SECS }
    }
}

impl GranteeCacheConfig {
    #[inline]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub permission_cache: PermissionCacheConfig,
    pub grantee_cache: GranteeCacheConfig,
    /// Targets whose parsed ACL is kept in memory
    pub acl_cache_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            permission_cache: PermissionCacheConfig::default(),
            grantee_cache: GranteeCacheConfig::default(),
            acl_cache_size: DEFAULT_ACL_CACHE_SIZE,
        }
    }
}

impl EngineConfig {
    pub fn from_json(s: &str) -> Result<Self> {
        let cfg: EngineConfig = serde_json::from_str(s).map_err(config_err)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path.as_ref()).map_err(config_err)?;
        Self::from_json(&s)
    }

    /// Apply `RIGHTGATE_*` overrides on top of `self`
    pub fn with_env(self) -> Result<Self> {
        self.with_overrides(|k| std::env::var(k).ok())
    }

    /// Apply overrides from any key lookup (env in production, a map in tests)
    pub fn with_overrides<F: Fn(&str) -> Option<String>>(mut self, get: F) -> Result<Self> {
        fn num<T: std::str::FromStr>(key: &str, v: String) -> Result<T> {
            v.trim().parse().map_err(|_| AclError::Config(format!("{}: not a number: {}", key, v)))
        }
        if let Some(v) = get("RIGHTGATE_PERM_CACHE_TARGETS") {
            self.permission_cache.max_targets = num("RIGHTGATE_PERM_CACHE_TARGETS", v)?;
        }
        if let Some(v) = get("RIGHTGATE_PERM_CACHE_GRANTEES") {
            self.permission_cache.max_grantees_per_target = num("RIGHTGATE_PERM_CACHE_GRANTEES", v)?;
        }
        if let Some(v) = get("RIGHTGATE_PERM_CACHE_TTL_SECS") {
            self.permission_cache.bucket_ttl_secs = Some(num("RIGHTGATE_PERM_CACHE_TTL_SECS", v)?);
        }
        if let Some(v) = get("RIGHTGATE_PERM_CACHE_ENABLED") {
            self.permission_cache.enabled = is_true(v.trim()) || v.trim() == "1";
        }
        if let Some(v) = get("RIGHTGATE_GRANTEE_CACHE_SIZE") {
            self.grantee_cache.capacity = num("RIGHTGATE_GRANTEE_CACHE_SIZE", v)?;
        }
        if let Some(v) = get("RIGHTGATE_GRANTEE_CACHE_TTL_SECS") {
            self.grantee_cache.ttl_secs = num("RIGHTGATE_GRANTEE_CACHE_TTL_SECS", v)?;
        }
        if let Some(v) = get("RIGHTGATE_ACL_CACHE_SIZE") {
            self.acl_cache_size = num("RIGHTGATE_ACL_CACHE_SIZE", v)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.permission_cache.max_targets == 0 || self.permission_cache.max_grantees_per_target == 0 {
            return Err(AclError::Config("permission cache capacities must be non-zero".into()));
        }
        if self.grantee_cache.capacity == 0 {
            return Err(AclError::Config("grantee cache capacity must be non-zero".into()));
        }
        if self.acl_cache_size == 0 {
            return Err(AclError::Config("acl cache size must be non-zero".into()));
        }
        Ok(())
    }
}
