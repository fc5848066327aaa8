//! Execution contexts: where store operations run.
//!
//! The same publish and read logic runs in two places:
//! - [`PrivilegedContext`] models the kernel-equivalent engine. A
//!   process-wide [`StoreAnchor`] opens the Store root once at start-up and
//!   holds it until shutdown. Failures surface as NTSTATUS codes.
//! - [`HostContext`] models an ordinary process. It opens the Store root
//!   on every call and closes it before returning. Failures surface as
//!   Win32 error codes.
//!
//! Shared code is generic over [`ExecutionContext`]; nothing branches on
//! which context it runs in.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use tracing::debug;

use crate::error::StoreError;
use crate::hive::{join_path, key_name, Hive, HiveFailure, RawHandle};
use crate::status::{ntstatus, win32, StatusCode};

/// An open key in the hive.
///
/// Movable but not clonable; the handle is closed when the key is dropped.
pub struct RegistryKey<H: Hive> {
    hive: Arc<H>,
    raw: RawHandle,
    path: String,
}

/// Handle to one provider's key, as returned by
/// [`open_or_create_provider_key`](crate::resolver::open_or_create_provider_key).
pub type ProviderRegistryKey<C> = RegistryKey<<C as ExecutionContext>::Hive>;

impl<H: Hive> RegistryKey<H> {
    /// Absolute path of the key inside the hive.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last key name of the path.
    pub fn name(&self) -> &str {
        key_name(&self.path)
    }

    pub fn raw(&self) -> RawHandle {
        self.raw
    }
}

impl<H: Hive> Drop for RegistryKey<H> {
    fn drop(&mut self) {
        self.hive.close_key(self.raw);
    }
}

impl<H: Hive> fmt::Debug for RegistryKey<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryKey")
            .field("raw", &self.raw)
            .field("path", &self.path)
            .finish()
    }
}

/// The Store root as seen by one call: borrowed from an anchor, or opened
/// for the duration of the call.
#[derive(Debug)]
pub enum RootKey<'a, H: Hive> {
    Anchored(&'a RegistryKey<H>),
    Opened(RegistryKey<H>),
}

impl<H: Hive> Deref for RootKey<'_, H> {
    type Target = RegistryKey<H>;

    fn deref(&self) -> &RegistryKey<H> {
        match self {
            RootKey::Anchored(key) => key,
            RootKey::Opened(key) => key,
        }
    }
}

/// Operations that differ between the privileged and host contexts.
///
/// Key access helpers are provided methods so every caller reports failures
/// with the context's own status codes.
pub trait ExecutionContext: Sized {
    type Hive: Hive;

    /// Status reported for rejected identifiers and malformed records.
    const INVALID_PARAMETER: StatusCode;

    fn hive(&self) -> &Arc<Self::Hive>;

    /// Absolute path of the Store root.
    fn root_path(&self) -> &str;

    /// Translates a hive failure into this context's status code.
    fn native_status(failure: &HiveFailure) -> StatusCode;

    /// The Store root, created if it does not exist yet.
    fn root(&self) -> Result<RootKey<'_, Self::Hive>, StoreError>;

    /// The Store root if it exists. Never creates anything.
    fn existing_root(&self) -> Result<Option<RootKey<'_, Self::Hive>>, StoreError>;

    /// Opens `relative` under `base` (or the hive root), creating it and
    /// any missing intermediate keys.
    fn create_key(
        &self,
        base: Option<&RegistryKey<Self::Hive>>,
        relative: &str,
    ) -> Result<RegistryKey<Self::Hive>, StoreError> {
        let path = join_path(base.map_or("", |key| key.path()), relative);
        let raw = self
            .hive()
            .create_key(base.map(RegistryKey::raw), relative)
            .map_err(|failure| StoreError::key_access::<Self>(path.as_str(), failure))?;
        Ok(RegistryKey {
            hive: Arc::clone(self.hive()),
            raw,
            path,
        })
    }

    /// Opens an existing key; `None` if it does not exist.
    fn open_key(
        &self,
        base: Option<&RegistryKey<Self::Hive>>,
        relative: &str,
    ) -> Result<Option<RegistryKey<Self::Hive>>, StoreError> {
        let path = join_path(base.map_or("", |key| key.path()), relative);
        match self.hive().open_key(base.map(RegistryKey::raw), relative) {
            Ok(raw) => Ok(Some(RegistryKey {
                hive: Arc::clone(self.hive()),
                raw,
                path,
            })),
            Err(HiveFailure::NotFound { .. }) => Ok(None),
            Err(failure) => Err(StoreError::key_access::<Self>(path, failure)),
        }
    }

    fn set_value(
        &self,
        key: &RegistryKey<Self::Hive>,
        name: &str,
        data: &[u8],
    ) -> Result<(), StoreError> {
        self.hive()
            .set_value(key.raw(), name, data)
            .map_err(StoreError::service::<Self>)
    }

    fn query_value(
        &self,
        key: &RegistryKey<Self::Hive>,
        name: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        self.hive()
            .query_value(key.raw(), name)
            .map_err(StoreError::service::<Self>)
    }

    fn subkeys(&self, key: &RegistryKey<Self::Hive>) -> Result<Vec<String>, StoreError> {
        self.hive()
            .subkeys(key.raw())
            .map_err(StoreError::service::<Self>)
    }

    fn values(&self, key: &RegistryKey<Self::Hive>) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        self.hive()
            .values(key.raw())
            .map_err(StoreError::service::<Self>)
    }
}

// ---------------------------------------------------------------------------
// Privileged context
// ---------------------------------------------------------------------------

/// Process-scoped reference to the Store root for the privileged context.
///
/// Must be initialized before any [`PrivilegedContext`] is created and
/// outlives all of them; [`shutdown`](StoreAnchor::shutdown) releases the
/// root key.
#[derive(Debug)]
pub struct StoreAnchor<H: Hive> {
    root: RegistryKey<H>,
}

impl<H: Hive> StoreAnchor<H> {
    /// Opens (creating if needed) the Store root at `root_path`.
    pub fn initialize(hive: Arc<H>, root_path: &str) -> Result<Self, StoreError> {
        let raw = hive
            .create_key(None, root_path)
            .map_err(|failure| StoreError::KeyAccessFailure {
                path: root_path.to_string(),
                status: nt_status(&failure),
                source: failure,
            })?;
        debug!(root = root_path, "store anchor initialized");
        Ok(StoreAnchor {
            root: RegistryKey {
                hive,
                raw,
                path: root_path.to_string(),
            },
        })
    }

    pub fn root(&self) -> &RegistryKey<H> {
        &self.root
    }

    pub fn hive(&self) -> &Arc<H> {
        &self.root.hive
    }

    /// Releases the root key.
    pub fn shutdown(self) {
        debug!(root = %self.root.path, "store anchor released");
    }
}

/// Kernel-equivalent context borrowing a [`StoreAnchor`].
#[derive(Debug)]
pub struct PrivilegedContext<'a, H: Hive> {
    anchor: &'a StoreAnchor<H>,
}

impl<'a, H: Hive> PrivilegedContext<'a, H> {
    pub fn new(anchor: &'a StoreAnchor<H>) -> Self {
        PrivilegedContext { anchor }
    }
}

impl<H: Hive> ExecutionContext for PrivilegedContext<'_, H> {
    type Hive = H;

    const INVALID_PARAMETER: StatusCode = ntstatus::STATUS_INVALID_PARAMETER;

    fn hive(&self) -> &Arc<H> {
        self.anchor.hive()
    }

    fn root_path(&self) -> &str {
        self.anchor.root.path()
    }

    fn native_status(failure: &HiveFailure) -> StatusCode {
        nt_status(failure)
    }

    fn root(&self) -> Result<RootKey<'_, H>, StoreError> {
        Ok(RootKey::Anchored(self.anchor.root()))
    }

    fn existing_root(&self) -> Result<Option<RootKey<'_, H>>, StoreError> {
        Ok(Some(RootKey::Anchored(self.anchor.root())))
    }
}

fn nt_status(failure: &HiveFailure) -> StatusCode {
    match failure {
        HiveFailure::NotFound { .. } => ntstatus::STATUS_OBJECT_NAME_NOT_FOUND,
        HiveFailure::AccessDenied { .. } => ntstatus::STATUS_ACCESS_DENIED,
        HiveFailure::InvalidHandle(_) => ntstatus::STATUS_INVALID_HANDLE,
        HiveFailure::NameTooLong { .. } => ntstatus::STATUS_NAME_TOO_LONG,
        HiveFailure::InvalidName { .. } => ntstatus::STATUS_OBJECT_NAME_INVALID,
        HiveFailure::QuotaExceeded => ntstatus::STATUS_INSUFFICIENT_RESOURCES,
        HiveFailure::Corrupt { .. } => ntstatus::STATUS_REGISTRY_CORRUPT,
        HiveFailure::Io { .. } => ntstatus::STATUS_REGISTRY_IO_FAILED,
    }
}

// ---------------------------------------------------------------------------
// Host context
// ---------------------------------------------------------------------------

/// Ordinary-process context. Opens the Store root per call.
#[derive(Debug)]
pub struct HostContext<H: Hive> {
    hive: Arc<H>,
    root_path: String,
}

impl<H: Hive> HostContext<H> {
    pub fn new(hive: Arc<H>, root_path: impl Into<String>) -> Self {
        HostContext {
            hive,
            root_path: root_path.into(),
        }
    }
}

impl<H: Hive> ExecutionContext for HostContext<H> {
    type Hive = H;

    const INVALID_PARAMETER: StatusCode = win32::ERROR_INVALID_PARAMETER;

    fn hive(&self) -> &Arc<H> {
        &self.hive
    }

    fn root_path(&self) -> &str {
        &self.root_path
    }

    fn native_status(failure: &HiveFailure) -> StatusCode {
        win32_status(failure)
    }

    fn root(&self) -> Result<RootKey<'_, H>, StoreError> {
        self.create_key(None, &self.root_path).map(RootKey::Opened)
    }

    fn existing_root(&self) -> Result<Option<RootKey<'_, H>>, StoreError> {
        Ok(self.open_key(None, &self.root_path)?.map(RootKey::Opened))
    }
}

fn win32_status(failure: &HiveFailure) -> StatusCode {
    match failure {
        HiveFailure::NotFound { .. } => win32::ERROR_FILE_NOT_FOUND,
        HiveFailure::AccessDenied { .. } => win32::ERROR_ACCESS_DENIED,
        HiveFailure::InvalidHandle(_) => win32::ERROR_INVALID_HANDLE,
        HiveFailure::NameTooLong { .. } => win32::ERROR_FILENAME_EXCED_RANGE,
        HiveFailure::InvalidName { .. } => win32::ERROR_INVALID_NAME,
        HiveFailure::QuotaExceeded => win32::ERROR_NO_SYSTEM_RESOURCES,
        HiveFailure::Corrupt { .. } => win32::ERROR_REGISTRY_CORRUPT,
        HiveFailure::Io { .. } => win32::ERROR_REGISTRY_IO_FAILED,
    }
}
