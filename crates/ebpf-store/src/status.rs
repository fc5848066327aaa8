//! Native status codes.
//!
//! Every operation result maps to a single unsigned [`StatusCode`]. Zero is
//! success in both execution contexts; any other value is the native
//! service's own failure code, handed to the caller unchanged so it can be
//! looked up in the platform's documentation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Unsigned status code reported by the native key-value service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub u32);

impl StatusCode {
    pub const SUCCESS: StatusCode = StatusCode(0);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010X}", self.0)
    }
}

/// NTSTATUS values reported by the kernel-mode registry.
pub mod ntstatus {
    use super::StatusCode;

    pub const STATUS_SUCCESS: StatusCode = StatusCode(0x0000_0000);
    pub const STATUS_INVALID_HANDLE: StatusCode = StatusCode(0xC000_0008);
    pub const STATUS_INVALID_PARAMETER: StatusCode = StatusCode(0xC000_000D);
    pub const STATUS_ACCESS_DENIED: StatusCode = StatusCode(0xC000_0022);
    pub const STATUS_OBJECT_NAME_INVALID: StatusCode = StatusCode(0xC000_0033);
    pub const STATUS_OBJECT_NAME_NOT_FOUND: StatusCode = StatusCode(0xC000_0034);
    pub const STATUS_INSUFFICIENT_RESOURCES: StatusCode = StatusCode(0xC000_009A);
    pub const STATUS_NAME_TOO_LONG: StatusCode = StatusCode(0xC000_0106);
    pub const STATUS_REGISTRY_CORRUPT: StatusCode = StatusCode(0xC000_014C);
    pub const STATUS_REGISTRY_IO_FAILED: StatusCode = StatusCode(0xC000_014D);
}

/// Win32 error codes reported by the user-mode registry API.
pub mod win32 {
    use super::StatusCode;

    pub const ERROR_SUCCESS: StatusCode = StatusCode(0);
    pub const ERROR_FILE_NOT_FOUND: StatusCode = StatusCode(2);
    pub const ERROR_ACCESS_DENIED: StatusCode = StatusCode(5);
    pub const ERROR_INVALID_HANDLE: StatusCode = StatusCode(6);
    pub const ERROR_INVALID_PARAMETER: StatusCode = StatusCode(87);
    pub const ERROR_INVALID_NAME: StatusCode = StatusCode(123);
    pub const ERROR_FILENAME_EXCED_RANGE: StatusCode = StatusCode(206);
    pub const ERROR_REGISTRY_CORRUPT: StatusCode = StatusCode(1015);
    pub const ERROR_REGISTRY_IO_FAILED: StatusCode = StatusCode(1016);
    pub const ERROR_NO_SYSTEM_RESOURCES: StatusCode = StatusCode(1450);
}

/// Collapses an operation result into its status code.
pub trait OperationStatus {
    fn status(&self) -> StatusCode;
}

impl<T> OperationStatus for Result<T, StoreError> {
    fn status(&self) -> StatusCode {
        match self {
            Ok(_) => StatusCode::SUCCESS,
            Err(err) => err.status(),
        }
    }
}
