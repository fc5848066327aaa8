//! Registry-backed store for eBPF program-type metadata.
//!
//! Providers publish their program types, section conventions and helper
//! prototypes here so the execution engine and unprivileged tooling can
//! share them across restarts.
//!
//! # Architecture
//!
//! - A [`Hive`] is the native hierarchical key-value service. It has an
//!   in-memory and a SQLite backend.
//! - An [`ExecutionContext`] decides how the Store root is reached and which
//!   status codes failures carry: [`PrivilegedContext`] through a
//!   [`StoreAnchor`], [`HostContext`] by opening the root per call.
//! - The resolver maps GUIDs and helper IDs to key paths.
//! - The codec turns each record into one blob, written as a single value
//!   so readers never see half a record.
//! - [`Store`] ties these together: publish, read and snapshot.
//!
//! # Modules
//!
//! - [`codec`]: binary record layout
//! - [`config`]: StoreConfig and environment overrides
//! - [`context`]: execution contexts and RAII key handles
//! - [`error`]: StoreError with native status codes
//! - [`hive`]: Hive trait and path helpers
//! - [`memory`]: MemoryHive implementation
//! - [`publisher`]: update operations
//! - [`reader`]: lookup and enumeration
//! - [`resolver`]: key hierarchy
//! - [`schema`]: SQLite schema and migrations
//! - [`snapshot`]: deterministic dumps and fingerprints
//! - [`sqlite`]: SqliteHive implementation
//! - [`status`]: NTSTATUS and Win32 code tables

pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod hive;
pub mod memory;
pub mod publisher;
pub mod reader;
pub mod resolver;
pub mod schema;
pub mod snapshot;
pub mod sqlite;
pub mod status;
pub mod store;

// Re-export key types for ergonomic use.
pub use codec::{CodecError, RecordKind, RECORD_VALUE_NAME};
pub use config::StoreConfig;
pub use context::{
    ExecutionContext, HostContext, PrivilegedContext, ProviderRegistryKey, RegistryKey, RootKey,
    StoreAnchor,
};
pub use error::StoreError;
pub use hive::{Hive, HiveFailure, RawHandle};
pub use memory::MemoryHive;
pub use snapshot::{SnapshotNode, StoreSnapshot};
pub use sqlite::SqliteHive;
pub use status::{OperationStatus, StatusCode};
pub use store::Store;
