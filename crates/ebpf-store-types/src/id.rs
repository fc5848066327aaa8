//! Numeric identifier newtypes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a helper function, unique within its scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HelperId(pub u32);

impl fmt::Display for HelperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for HelperId {
    fn from(value: u32) -> Self {
        HelperId(value)
    }
}
