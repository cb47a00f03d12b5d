//! Persistent map from repository group to the cache keys issued for it
//!
//! The cache store cannot enumerate its keys, so every key the decorator
//! issues is recorded here under its repository's name. Invalidation reads a
//! group back and evicts each key.
//!
//! Writes are whole-map read-modify-write cycles. [`CacheKeyRegistry`]
//! serializes them in-process with a mutex; [`FileRegistryBackend`] also
//! takes an exclusive `flock` on a sidecar lock file and replaces the
//! registry file atomically, so concurrent processes never lose each other's
//! updates.

use nix::fcntl::{Flock, FlockArg};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tempfile::NamedTempFile;
use tracing::{debug, trace};

use crate::cache::locks::KeyedLocks;
use crate::config::CacheConfig;
use crate::core::error::{RepositoryError, Result};

/// Group name → keys, in registration order
pub type KeyMap = BTreeMap<String, Vec<String>>;

/// Storage for the registry map
pub trait RegistryBackend: Send + Sync {
    fn read_all(&self) -> Result<KeyMap>;

    fn write_all(&self, keys: &KeyMap) -> Result<()>;

    /// Read, apply `change`, write back, and return the new map.
    ///
    /// The provided version is not atomic across processes; backends shared
    /// between processes override it.
    fn update(&self, change: &mut dyn FnMut(&mut KeyMap)) -> Result<KeyMap> {
        let mut keys = self.read_all()?;
        change(&mut keys);
        self.write_all(&keys)?;
        Ok(keys)
    }
}

/// Mutex-guarded map, for tests and single-process deployments
#[derive(Debug, Default)]
pub struct InMemoryRegistryBackend {
    keys: Mutex<KeyMap>,
}

impl InMemoryRegistryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, KeyMap>> {
        self.keys
            .lock()
            .map_err(|e| RepositoryError::Registry(format!("Failed to acquire registry lock: {}", e)))
    }
}

impl RegistryBackend for InMemoryRegistryBackend {
    fn read_all(&self) -> Result<KeyMap> {
        Ok(self.lock()?.clone())
    }

    fn write_all(&self, keys: &KeyMap) -> Result<()> {
        *self.lock()? = keys.clone();
        Ok(())
    }

    fn update(&self, change: &mut dyn FnMut(&mut KeyMap)) -> Result<KeyMap> {
        let mut keys = self.lock()?;
        change(&mut *keys);
        Ok(keys.clone())
    }
}

/// Pretty-printed JSON object `{group: [keys]}` on disk
#[derive(Debug, Clone)]
pub struct FileRegistryBackend {
    path: PathBuf,
}

impl FileRegistryBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sidecar file holding the advisory lock
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "repository-cache-keys.json".into());
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn directory(&self) -> &Path {
        self.path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }

    fn lock(&self, arg: FlockArg) -> Result<Flock<File>> {
        std::fs::create_dir_all(self.directory())?;
        let lock_path = self.lock_path();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        Flock::lock(file, arg).map_err(|(_, err)| {
            RepositoryError::Registry(format!("{}: {}", lock_path.display(), err))
        })
    }

    fn read_unlocked(&self) -> Result<KeyMap> {
        if !self.path.exists() {
            return Ok(KeyMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(KeyMap::new());
        }
        serde_json::from_str(&content).map_err(|e| {
            RepositoryError::Registry(format!("{}: {}", self.path.display(), e))
        })
    }

    fn write_unlocked(&self, keys: &KeyMap) -> Result<()> {
        let mut file = NamedTempFile::new_in(self.directory())?;
        serde_json::to_writer_pretty(&mut file, keys)?;
        file.flush()?;
        file.persist(&self.path).map_err(|e| {
            RepositoryError::Registry(format!("{}: {}", self.path.display(), e))
        })?;
        Ok(())
    }
}

impl RegistryBackend for FileRegistryBackend {
    fn read_all(&self) -> Result<KeyMap> {
        let _lock = self.lock(FlockArg::LockShared)?;
        self.read_unlocked()
    }

    fn write_all(&self, keys: &KeyMap) -> Result<()> {
        let _lock = self.lock(FlockArg::LockExclusive)?;
        self.write_unlocked(keys)
    }

    fn update(&self, change: &mut dyn FnMut(&mut KeyMap)) -> Result<KeyMap> {
        let _lock = self.lock(FlockArg::LockExclusive)?;
        let mut keys = self.read_unlocked()?;
        change(&mut keys);
        self.write_unlocked(&keys)?;
        Ok(keys)
    }
}

/// The registry itself: a backend plus an in-process memo
///
/// Construct it once with [`CacheKeyRegistry::open`] and share it by `Arc`
/// between decorators and the invalidation subscriber. Decorators sharing a
/// registry also share its [`KeyedLocks`], so each key is populated by at
/// most one of them at a time.
pub struct CacheKeyRegistry {
    backend: Box<dyn RegistryBackend>,
    memo: Mutex<KeyMap>,
    locks: Arc<KeyedLocks>,
}

impl CacheKeyRegistry {
    /// Load the registry from `backend`
    pub fn open(backend: impl RegistryBackend + 'static) -> Result<Self> {
        let keys = backend.read_all()?;
        debug!(groups = keys.len(), "cache key registry loaded");
        Ok(Self {
            backend: Box::new(backend),
            memo: Mutex::new(keys),
            locks: Arc::new(KeyedLocks::new()),
        })
    }

    /// A registry kept in process memory only
    pub fn in_memory() -> Self {
        Self {
            backend: Box::new(InMemoryRegistryBackend::new()),
            memo: Mutex::new(KeyMap::new()),
            locks: Arc::new(KeyedLocks::new()),
        }
    }

    /// File-backed when `registry_path` is set, in-memory otherwise
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        match &config.registry_path {
            Some(path) => Self::open(FileRegistryBackend::new(path)),
            None => Ok(Self::in_memory()),
        }
    }

    /// Single-flight locks for the keys of this registry
    pub fn locks(&self) -> Arc<KeyedLocks> {
        self.locks.clone()
    }

    fn memo(&self) -> Result<MutexGuard<'_, KeyMap>> {
        self.memo
            .lock()
            .map_err(|e| RepositoryError::Registry(format!("Failed to acquire registry lock: {}", e)))
    }

    /// Record `key` under `group`; registering a key twice is a no-op
    pub fn put_key(&self, group: &str, key: &str) -> Result<()> {
        let mut memo = self.memo()?;
        let keys = self.backend.update(&mut |map: &mut KeyMap| {
            let entry = map.entry(group.to_string()).or_default();
            if !entry.iter().any(|existing| existing == key) {
                entry.push(key.to_string());
            }
        })?;
        *memo = keys;
        trace!(group, key, "cache key registered");
        Ok(())
    }

    /// Keys registered under `group`, empty when the group is unknown
    pub fn get_keys(&self, group: &str) -> Result<Vec<String>> {
        Ok(self.memo()?.get(group).cloned().unwrap_or_default())
    }

    pub fn groups(&self) -> Result<Vec<String>> {
        Ok(self.memo()?.keys().cloned().collect())
    }

    /// Drop `keys` from `group`, and the group itself once empty
    ///
    /// A key dropped while a decorator can still store it escapes later
    /// invalidation; prune only groups nothing is reading.
    pub fn remove_keys(&self, group: &str, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut memo = self.memo()?;
        let updated = self.backend.update(&mut |map: &mut KeyMap| {
            if let Some(entry) = map.get_mut(group) {
                entry.retain(|existing| !keys.contains(existing));
                if entry.is_empty() {
                    map.remove(group);
                }
            }
        })?;
        *memo = updated;
        Ok(())
    }

    /// Forget every group
    pub fn reset(&self) -> Result<()> {
        let mut memo = self.memo()?;
        *memo = self.backend.update(&mut |map: &mut KeyMap| map.clear())?;
        debug!("cache key registry reset");
        Ok(())
    }

    /// Re-read the backend, picking up keys written by other processes
    pub fn reload(&self) -> Result<()> {
        let mut memo = self.memo()?;
        *memo = self.backend.read_all()?;
        Ok(())
    }

    /// Persist the memo, merging it into whatever the backend holds
    pub fn flush(&self) -> Result<()> {
        let mut memo = self.memo()?;
        let snapshot = memo.clone();
        *memo = self.backend.update(&mut |map: &mut KeyMap| {
            for (group, keys) in &snapshot {
                let entry = map.entry(group.clone()).or_default();
                for key in keys {
                    if !entry.contains(key) {
                        entry.push(key.clone());
                    }
                }
            }
        })?;
        debug!(groups = memo.len(), "cache key registry persisted");
        Ok(())
    }
}

impl std::fmt::Debug for CacheKeyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let groups = self.memo().map(|memo| memo.len()).unwrap_or(0);
        f.debug_struct("CacheKeyRegistry")
            .field("groups", &groups)
            .field("locks", &self.locks.len())
            .finish()
    }
}
