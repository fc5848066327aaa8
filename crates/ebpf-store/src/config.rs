//! Store configuration.
//!
//! Reads configuration from environment variables:
//! - `EBPF_STORE_HIVE`: hive database file path (default: "ebpf-store.db")
//! - `EBPF_STORE_ROOT`: Store root key path (default: "Software/eBPF/Providers")

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::{ExecutionContext, HostContext};
use crate::error::StoreError;
use crate::hive::{validate_path, HiveFailure};
use crate::sqlite::SqliteHive;
use crate::store::Store;

pub const HIVE_PATH_VAR: &str = "EBPF_STORE_HIVE";
pub const ROOT_PATH_VAR: &str = "EBPF_STORE_ROOT";

pub const DEFAULT_HIVE_PATH: &str = "ebpf-store.db";
pub const DEFAULT_ROOT_PATH: &str = "Software/eBPF/Providers";

/// Where the store lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite hive file.
    pub hive_path: PathBuf,
    /// Key path of the Store root inside the hive.
    pub root_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            hive_path: PathBuf::from(DEFAULT_HIVE_PATH),
            root_path: DEFAULT_ROOT_PATH.to_string(),
        }
    }
}

impl StoreConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    /// Empty values are ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = StoreConfig::default();
        if let Some(hive_path) = lookup(HIVE_PATH_VAR).filter(|v| !v.is_empty()) {
            config.hive_path = PathBuf::from(hive_path);
        }
        if let Some(root_path) = lookup(ROOT_PATH_VAR).filter(|v| !v.is_empty()) {
            config.root_path = root_path;
        }
        config
    }

    /// Opens the configured hive file, creating it if needed.
    pub fn open_hive(&self) -> Result<SqliteHive, HiveFailure> {
        validate_path(&self.root_path)?;
        debug!(hive = %self.hive_path.display(), root = %self.root_path, "opening store");
        SqliteHive::open(&self.hive_path)
    }

    /// Opens the configured hive file for reading. The file must already
    /// exist; it is never created or migrated.
    pub fn open_hive_read_only(&self) -> Result<SqliteHive, HiveFailure> {
        validate_path(&self.root_path)?;
        debug!(hive = %self.hive_path.display(), root = %self.root_path, "opening store read-only");
        SqliteHive::open_read_only(&self.hive_path)
    }

    /// A host-context store over the configured hive.
    pub fn open_host_store(&self) -> Result<Store<HostContext<SqliteHive>>, StoreError> {
        self.host_store(self.open_hive())
    }

    /// A host-context store over the existing hive file, for inspection.
    pub fn open_read_only_store(&self) -> Result<Store<HostContext<SqliteHive>>, StoreError> {
        self.host_store(self.open_hive_read_only())
    }

    fn host_store(
        &self,
        hive: Result<SqliteHive, HiveFailure>,
    ) -> Result<Store<HostContext<SqliteHive>>, StoreError> {
        let hive = hive.map_err(|failure| StoreError::KeyAccessFailure {
            path: self.root_path.clone(),
            status: HostContext::<SqliteHive>::native_status(&failure),
            source: failure,
        })?;
        Ok(Store::host(Arc::new(hive), self.root_path.clone()))
    }
}
