//! In-memory implementation of [`Hive`].
//!
//! [`MemoryHive`] is a first-class backend for tests and for the privileged
//! context's process-local view. It keeps the whole key tree in a
//! `BTreeMap` behind a lock, with the same semantics as the SQLite backend.
//! Optional fault knobs (a key quota and a read-only switch) let tests
//! drive the failure paths a real registry can produce.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::trace;

use crate::hive::{key_name, lineage, parent_path, HandleTable, Hive, HiveFailure, RawHandle};

/// Values stored on one key.
type KeyValues = BTreeMap<String, Vec<u8>>;

/// In-memory implementation of [`Hive`].
#[derive(Debug)]
pub struct MemoryHive {
    /// Every key by absolute path. The root is stored under `""`.
    keys: RwLock<BTreeMap<String, KeyValues>>,
    handles: HandleTable,
    /// Maximum number of keys besides the root.
    key_quota: Option<usize>,
    read_only: AtomicBool,
}

impl MemoryHive {
    /// Creates a hive holding only the root key.
    pub fn new() -> Self {
        let mut keys = BTreeMap::new();
        keys.insert(String::new(), KeyValues::new());
        MemoryHive {
            keys: RwLock::new(keys),
            handles: HandleTable::default(),
            key_quota: None,
            read_only: AtomicBool::new(false),
        }
    }

    /// Creates a hive that refuses to hold more than `quota` keys.
    pub fn with_key_quota(quota: usize) -> Self {
        MemoryHive {
            key_quota: Some(quota),
            ..Self::new()
        }
    }

    /// While read-only, creating keys and writing values is denied.
    /// Opening keys that already exist still succeeds.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Number of keys besides the root.
    pub fn key_count(&self) -> usize {
        self.read().len() - 1
    }

    /// Whether a key exists at the absolute `path`.
    pub fn contains_key(&self, path: &str) -> bool {
        self.read().contains_key(path)
    }

    fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, KeyValues>> {
        self.keys.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, KeyValues>> {
        self.keys.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryHive {
    fn default() -> Self {
        Self::new()
    }
}

impl Hive for MemoryHive {
    fn open_key(&self, base: Option<RawHandle>, path: &str) -> Result<RawHandle, HiveFailure> {
        let path = self.handles.resolve(base, path)?;
        if !self.read().contains_key(&path) {
            return Err(HiveFailure::NotFound { path });
        }
        trace!(path = %path, "open key");
        Ok(self.handles.insert(path))
    }

    fn create_key(&self, base: Option<RawHandle>, path: &str) -> Result<RawHandle, HiveFailure> {
        let path = self.handles.resolve(base, path)?;
        {
            let mut keys = self.write();
            let missing: Vec<&str> = lineage(&path)
                .into_iter()
                .filter(|candidate| !keys.contains_key(*candidate))
                .collect();

            if !missing.is_empty() {
                if self.is_read_only() {
                    return Err(HiveFailure::AccessDenied { path: path.clone() });
                }
                if let Some(quota) = self.key_quota {
                    if keys.len() - 1 + missing.len() > quota {
                        return Err(HiveFailure::QuotaExceeded);
                    }
                }
                for created in missing {
                    keys.insert(created.to_string(), KeyValues::new());
                }
                trace!(path = %path, "created key");
            }
        }
        Ok(self.handles.insert(path))
    }

    fn close_key(&self, handle: RawHandle) {
        if self.handles.remove(handle) {
            trace!(%handle, "closed key");
        }
    }

    fn set_value(&self, handle: RawHandle, name: &str, data: &[u8]) -> Result<(), HiveFailure> {
        let path = self.handles.path(handle)?;
        if self.is_read_only() {
            return Err(HiveFailure::AccessDenied { path });
        }
        let mut keys = self.write();
        let values = keys
            .get_mut(&path)
            .ok_or_else(|| HiveFailure::NotFound { path: path.clone() })?;
        values.insert(name.to_string(), data.to_vec());
        Ok(())
    }

    fn query_value(&self, handle: RawHandle, name: &str) -> Result<Option<Vec<u8>>, HiveFailure> {
        let path = self.handles.path(handle)?;
        let keys = self.read();
        let values = keys
            .get(&path)
            .ok_or_else(|| HiveFailure::NotFound { path: path.clone() })?;
        Ok(values.get(name).cloned())
    }

    fn subkeys(&self, handle: RawHandle) -> Result<Vec<String>, HiveFailure> {
        let path = self.handles.path(handle)?;
        let keys = self.read();
        if !keys.contains_key(&path) {
            return Err(HiveFailure::NotFound { path });
        }
        Ok(keys
            .keys()
            .filter(|candidate| parent_path(candidate) == Some(path.as_str()))
            .map(|child| key_name(child).to_string())
            .collect())
    }

    fn values(&self, handle: RawHandle) -> Result<Vec<(String, Vec<u8>)>, HiveFailure> {
        let path = self.handles.path(handle)?;
        let keys = self.read();
        let values = keys
            .get(&path)
            .ok_or_else(|| HiveFailure::NotFound { path: path.clone() })?;
        Ok(values
            .iter()
            .map(|(name, data)| (name.clone(), data.clone()))
            .collect())
    }

    fn open_handle_count(&self) -> usize {
        self.handles.len()
    }
}
