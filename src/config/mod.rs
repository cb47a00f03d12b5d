//! Configuration loading and management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::error::Result;
use crate::core::events::MutationAction;

/// Root configuration for repositories and their cache
///
/// ```yaml
/// pagination:
///   limit: 15
/// cache:
///   enabled: true
///   minutes: 30
///   registry_path: storage/repository-cache-keys.json
///   params:
///     skip_cache: skipCache
///   allowed:
///     only: [all, find]
///   clean:
///     on:
///       updating: false
/// ```
///
/// Every section and key is optional; missing values take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    pub pagination: PaginationConfig,
    pub cache: CacheConfig,
}

impl RepositoryConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Page size used when a caller does not pass one
    pub limit: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self { limit: 15 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Time to live of cached reads, in minutes
    pub minutes: u64,
    /// Where the file registry backend persists keys; `None` keeps the
    /// registry in memory
    pub registry_path: Option<PathBuf>,
    pub params: CacheParams,
    pub allowed: AllowedMethods,
    pub clean: CleanConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            minutes: 30,
            registry_path: Some(PathBuf::from("storage/repository-cache-keys.json")),
            params: CacheParams::default(),
            allowed: AllowedMethods::default(),
            clean: CleanConfig::default(),
        }
    }
}

/// Request parameter names the cache reacts to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheParams {
    /// A truthy request parameter with this name bypasses the cache
    pub skip_cache: String,
}

impl Default for CacheParams {
    fn default() -> Self {
        Self {
            skip_cache: "skipCache".to_string(),
        }
    }
}

/// Per-method cache allow/deny lists. `only` wins over `except`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllowedMethods {
    pub only: Option<Vec<String>>,
    pub except: Option<Vec<String>>,
}

impl AllowedMethods {
    pub fn allows(&self, method: &str) -> bool {
        if let Some(only) = &self.only {
            return only.iter().any(|m| m == method);
        }
        if let Some(except) = &self.except {
            return !except.iter().any(|m| m == method);
        }
        true
    }
}

/// Which mutations flush the acting repository's cache group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanConfig {
    pub enabled: bool,
    pub on: CleanOn,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            on: CleanOn::default(),
        }
    }
}

impl CleanConfig {
    /// Whether a mutation of kind `action` should flush the group
    pub fn flushes_on(&self, action: MutationAction) -> bool {
        self.enabled && self.on.allows(action)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanOn {
    pub created: bool,
    pub updated: bool,
    pub updating: bool,
    pub deleted: bool,
}

impl Default for CleanOn {
    fn default() -> Self {
        Self {
            created: true,
            updated: true,
            updating: false,
            deleted: true,
        }
    }
}

impl CleanOn {
    pub fn allows(&self, action: MutationAction) -> bool {
        match action {
            MutationAction::Created => self.created,
            MutationAction::Updated => self.updated,
            MutationAction::Updating => self.updating,
            MutationAction::Deleted => self.deleted,
        }
    }
}
