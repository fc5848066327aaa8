//! Store error types.
//!
//! [`StoreError`] is the single error type of the public surface. Every
//! variant carries the native [`StatusCode`] the caller would see from the
//! platform; lower-layer errors ride along as the `source`.

use thiserror::Error;

use crate::codec::CodecError;
use crate::context::ExecutionContext;
use crate::hive::HiveFailure;
use crate::status::StatusCode;

/// Errors produced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An identifier string or key handle does not name anything the store
    /// can resolve.
    #[error("invalid identifier {value:?}: {reason}")]
    InvalidIdentifier {
        value: String,
        reason: String,
        status: StatusCode,
    },

    /// The native service could not open or create a key.
    #[error("cannot open or create key '{path}' ({status}): {source}")]
    KeyAccessFailure {
        path: String,
        status: StatusCode,
        #[source]
        source: HiveFailure,
    },

    /// A record failed structural validation while encoding or decoding.
    #[error("malformed record ({status}): {source}")]
    MalformedRecord {
        status: StatusCode,
        #[source]
        source: CodecError,
    },

    /// Any other failure reported by the native service.
    #[error("underlying service failure ({status}): {source}")]
    UnderlyingServiceFailure {
        status: StatusCode,
        #[source]
        source: HiveFailure,
    },
}

impl StoreError {
    /// The native status code for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            StoreError::InvalidIdentifier { status, .. }
            | StoreError::KeyAccessFailure { status, .. }
            | StoreError::MalformedRecord { status, .. }
            | StoreError::UnderlyingServiceFailure { status, .. } => *status,
        }
    }

    pub(crate) fn invalid_identifier<C: ExecutionContext>(
        value: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        StoreError::InvalidIdentifier {
            value: value.into(),
            reason: reason.to_string(),
            status: C::INVALID_PARAMETER,
        }
    }

    pub(crate) fn key_access<C: ExecutionContext>(path: impl Into<String>, source: HiveFailure) -> Self {
        StoreError::KeyAccessFailure {
            path: path.into(),
            status: C::native_status(&source),
            source,
        }
    }

    pub(crate) fn malformed<C: ExecutionContext>(source: CodecError) -> Self {
        StoreError::MalformedRecord {
            status: C::INVALID_PARAMETER,
            source,
        }
    }

    pub(crate) fn service<C: ExecutionContext>(source: HiveFailure) -> Self {
        StoreError::UnderlyingServiceFailure {
            status: C::native_status(&source),
            source,
        }
    }
}
