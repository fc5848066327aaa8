//! Error types for ebpf-store-types.
//!
//! Uses `thiserror` for structured, matchable error variants covering
//! identifier parsing and record construction.

use thiserror::Error;

/// Reasons a string is not a canonical 38-character braced GUID.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    /// The string is not exactly 38 bytes long.
    #[error("expected 38 characters, found {len}")]
    WrongLength { len: usize },

    /// The string does not start with `{` and end with `}`.
    #[error("missing enclosing braces")]
    MissingBraces,

    /// A `-` separator is missing or in the wrong place.
    #[error("expected '-' at position {position}")]
    MisplacedSeparator { position: usize },

    /// A digit position holds something other than a hex digit.
    #[error("non-hex character {found:?} at position {position}")]
    NonHexDigit { position: usize, found: char },
}

/// Errors produced while building record values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    /// More argument tags than a helper prototype has slots for.
    #[error("helper takes at most {max} arguments, got {count}")]
    TooManyArguments { count: usize, max: usize },

    /// A raw tag byte does not name any known type tag.
    #[error("unknown type tag {0}")]
    UnknownTypeTag(u8),

    /// Flag bits outside the known program flag set.
    #[error("unknown program flag bits {0:#x}")]
    UnknownProgramFlags(u32),
}
