//! The [`Hive`] trait: the native hierarchical key-value service.
//!
//! The store never talks to a registry directly. It talks to a `Hive`,
//! which offers the handful of primitives a platform registry provides:
//! - handle-based **open / create / close** of keys, where create also
//!   creates missing intermediate keys and leaves siblings untouched;
//! - **per-value atomic** `set_value` / `query_value`;
//! - **enumeration** of subkeys and values.
//!
//! Backends ([`MemoryHive`](crate::memory::MemoryHive),
//! [`SqliteHive`](crate::sqlite::SqliteHive)) implement this trait and are
//! fully swappable underneath both execution contexts.
//!
//! Paths use `/` between key names. The empty path names the hive root.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

/// Separator between key names in a path.
pub const KEY_SEPARATOR: char = '/';

/// Longest key name a hive accepts, in bytes.
pub const MAX_KEY_NAME_LENGTH: usize = 255;

/// Opaque handle to an open key, valid until closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(pub(crate) u64);

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Failures reported by a hive, in backend-neutral terms.
///
/// Each execution context translates these into its own native status
/// codes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HiveFailure {
    #[error("key not found: '{path}'")]
    NotFound { path: String },

    #[error("access denied: '{path}'")]
    AccessDenied { path: String },

    #[error("invalid key handle {0}")]
    InvalidHandle(RawHandle),

    #[error("key name longer than 255 bytes: '{name}'")]
    NameTooLong { name: String },

    #[error("invalid key name {name:?}")]
    InvalidName { name: String },

    #[error("storage quota exceeded")]
    QuotaExceeded,

    #[error("hive corrupt: {reason}")]
    Corrupt { reason: String },

    #[error("hive I/O failure: {reason}")]
    Io { reason: String },
}

/// The native key-value service contract.
///
/// `base` is an open key the `path` is relative to, or `None` for the hive
/// root. Every handle returned by `open_key` / `create_key` must be passed
/// to `close_key` exactly once.
pub trait Hive: Send + Sync {
    /// Opens an existing key. Fails with [`HiveFailure::NotFound`] if absent.
    fn open_key(&self, base: Option<RawHandle>, path: &str) -> Result<RawHandle, HiveFailure>;

    /// Opens a key, creating it and any missing ancestors first.
    fn create_key(&self, base: Option<RawHandle>, path: &str) -> Result<RawHandle, HiveFailure>;

    /// Releases a handle. Closing an unknown handle is a no-op.
    fn close_key(&self, handle: RawHandle);

    /// Writes one value, replacing any previous data atomically.
    fn set_value(&self, handle: RawHandle, name: &str, data: &[u8]) -> Result<(), HiveFailure>;

    /// Reads one value, `None` if the key has no value with that name.
    fn query_value(&self, handle: RawHandle, name: &str) -> Result<Option<Vec<u8>>, HiveFailure>;

    /// Names of the direct subkeys, sorted.
    fn subkeys(&self, handle: RawHandle) -> Result<Vec<String>, HiveFailure>;

    /// All values of a key as `(name, data)`, sorted by name.
    fn values(&self, handle: RawHandle) -> Result<Vec<(String, Vec<u8>)>, HiveFailure>;

    /// Number of handles currently open.
    fn open_handle_count(&self) -> usize;
}

// ---------------------------------------------------------------------------
// Path helpers shared by the backends
// ---------------------------------------------------------------------------

/// Joins a base path and a relative path.
pub fn join_path(base: &str, relative: &str) -> String {
    match (base.is_empty(), relative.is_empty()) {
        (true, _) => relative.to_string(),
        (false, true) => base.to_string(),
        (false, false) => format!("{base}{KEY_SEPARATOR}{relative}"),
    }
}

/// The parent of `path`, `None` for the hive root.
pub fn parent_path(path: &str) -> Option<&str> {
    if path.is_empty() {
        return None;
    }
    Some(path.rsplit_once(KEY_SEPARATOR).map_or("", |(parent, _)| parent))
}

/// The last key name of `path`.
pub fn key_name(path: &str) -> &str {
    path.rsplit_once(KEY_SEPARATOR).map_or(path, |(_, name)| name)
}

/// Checks that every key name in a relative path is usable.
pub fn validate_path(path: &str) -> Result<(), HiveFailure> {
    if path.is_empty() {
        return Ok(());
    }
    for name in path.split(KEY_SEPARATOR) {
        if name.is_empty() || name.contains('\\') || name.chars().any(char::is_control) {
            return Err(HiveFailure::InvalidName {
                name: name.to_string(),
            });
        }
        if name.len() > MAX_KEY_NAME_LENGTH {
            return Err(HiveFailure::NameTooLong {
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

/// `path` and all of its ancestors except the hive root, shortest first.
pub(crate) fn lineage(path: &str) -> Vec<&str> {
    if path.is_empty() {
        return Vec::new();
    }
    let mut lineage: Vec<&str> = path
        .match_indices(KEY_SEPARATOR)
        .map(|(idx, _)| &path[..idx])
        .collect();
    lineage.push(path);
    lineage
}

// ---------------------------------------------------------------------------
// Handle table
// ---------------------------------------------------------------------------

/// Maps open handles to the absolute path of their key.
#[derive(Debug, Default)]
pub(crate) struct HandleTable {
    next: AtomicU64,
    open: Mutex<HashMap<RawHandle, String>>,
}

impl HandleTable {
    pub(crate) fn insert(&self, path: String) -> RawHandle {
        let handle = RawHandle(self.next.fetch_add(1, Ordering::Relaxed) + 1);
        self.lock().insert(handle, path);
        handle
    }

    pub(crate) fn path(&self, handle: RawHandle) -> Result<String, HiveFailure> {
        self.lock()
            .get(&handle)
            .cloned()
            .ok_or(HiveFailure::InvalidHandle(handle))
    }

    pub(crate) fn remove(&self, handle: RawHandle) -> bool {
        self.lock().remove(&handle).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Resolves `path` against `base` into an absolute, validated path.
    pub(crate) fn resolve(&self, base: Option<RawHandle>, path: &str) -> Result<String, HiveFailure> {
        validate_path(path)?;
        let base_path = match base {
            Some(handle) => self.path(handle)?,
            None => String::new(),
        };
        Ok(join_path(&base_path, path))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RawHandle, String>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "a/b"), "a/b");
        assert_eq!(join_path("a", ""), "a");
        assert_eq!(join_path("a", "b/c"), "a/b/c");
    }

    #[test]
    fn test_parent_and_name() {
        assert_eq!(parent_path(""), None);
        assert_eq!(parent_path("a"), Some(""));
        assert_eq!(parent_path("a/b/c"), Some("a/b"));
        assert_eq!(key_name("a/b/c"), "c");
        assert_eq!(key_name("a"), "a");
    }

    #[test]
    fn test_lineage() {
        assert!(lineage("").is_empty());
        assert_eq!(lineage("a"), vec!["a"]);
        assert_eq!(lineage("a/b/c"), vec!["a", "a/b", "a/b/c"]);
    }

    #[test]
    fn test_validate_path() {
        assert!(validate_path("").is_ok());
        assert!(validate_path("Software/eBPF/Providers").is_ok());
        assert_eq!(
            validate_path("a//b"),
            Err(HiveFailure::InvalidName { name: String::new() })
        );
        assert!(matches!(
            validate_path("a\\b"),
            Err(HiveFailure::InvalidName { .. })
        ));
        let long = "x".repeat(MAX_KEY_NAME_LENGTH + 1);
        assert!(matches!(
            validate_path(&long),
            Err(HiveFailure::NameTooLong { .. })
        ));
        assert!(validate_path(&"x".repeat(MAX_KEY_NAME_LENGTH)).is_ok());
    }

    #[test]
    fn test_handle_table() {
        let table = HandleTable::default();
        let a = table.insert("a".into());
        let b = table.insert("a/b".into());
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
        assert_eq!(table.resolve(Some(a), "c").unwrap(), "a/c");
        assert_eq!(table.resolve(None, "c").unwrap(), "c");

        assert!(table.remove(a));
        assert!(!table.remove(a));
        assert_eq!(table.path(a), Err(HiveFailure::InvalidHandle(a)));
        assert_eq!(table.len(), 1);
    }
}
