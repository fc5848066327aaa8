//! Canonical braced GUID identifiers.
//!
//! Providers, program types and attach types are all named by GUIDs. The
//! only accepted text form is the 38-character braced layout
//! `{XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX}`; anything else is rejected before
//! it can reach a key path.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IdentifierError;

/// Length of a canonical GUID string, braces included.
pub const GUID_STRING_LENGTH: usize = 38;

/// Byte offsets of the `-` separators inside a canonical GUID string.
const SEPARATOR_POSITIONS: [usize; 4] = [9, 14, 19, 24];

/// A 128-bit identifier with a canonical braced text form.
///
/// `Display` always renders uppercase hex, so two inputs differing only in
/// letter case name the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Guid(Uuid);

impl Guid {
    /// The all-zero GUID.
    pub const NIL: Guid = Guid(Uuid::nil());

    /// Wraps an existing [`Uuid`].
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Guid(uuid)
    }

    /// Builds a GUID from its 128-bit value.
    pub const fn from_u128(value: u128) -> Self {
        Guid(Uuid::from_u128(value))
    }

    /// Builds a GUID from its 16 raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Guid(Uuid::from_bytes(bytes))
    }

    /// The 16 raw bytes, most significant first.
    pub fn to_bytes(&self) -> [u8; 16] {
        *self.0.as_bytes()
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Parses a canonical 38-character braced GUID string.
    ///
    /// Hex digits may be either case. Every other deviation from the
    /// canonical layout is an [`IdentifierError`].
    pub fn parse(s: &str) -> Result<Guid, IdentifierError> {
        let bytes = s.as_bytes();
        if bytes.len() != GUID_STRING_LENGTH {
            return Err(IdentifierError::WrongLength { len: bytes.len() });
        }
        if bytes[0] != b'{' || bytes[GUID_STRING_LENGTH - 1] != b'}' {
            return Err(IdentifierError::MissingBraces);
        }

        let mut value: u128 = 0;
        for (position, &byte) in bytes
            .iter()
            .enumerate()
            .take(GUID_STRING_LENGTH - 1)
            .skip(1)
        {
            if SEPARATOR_POSITIONS.contains(&position) {
                if byte != b'-' {
                    return Err(IdentifierError::MisplacedSeparator { position });
                }
                continue;
            }
            let digit = (byte as char)
                .to_digit(16)
                .ok_or_else(|| IdentifierError::NonHexDigit {
                    position,
                    found: s
                        .get(position..)
                        .and_then(|rest| rest.chars().next())
                        .unwrap_or(byte as char),
                })?;
            value = (value << 4) | u128::from(digit);
        }

        Ok(Guid::from_u128(value))
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buffer = Uuid::encode_buffer();
        f.write_str(self.0.braced().encode_upper(&mut buffer))
    }
}

impl FromStr for Guid {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Guid::parse(s)
    }
}

impl TryFrom<String> for Guid {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Guid::parse(&value)
    }
}

impl From<Guid> for String {
    fn from(guid: Guid) -> Self {
        guid.to_string()
    }
}

impl From<Uuid> for Guid {
    fn from(uuid: Uuid) -> Self {
        Guid(uuid)
    }
}
