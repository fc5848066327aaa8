//! Record types for the eBPF program-type store.
//!
//! Everything a provider publishes is described here: canonical [`Guid`]
//! identifiers, helper prototypes with fixed-arity argument tags, program
//! type descriptions and section conventions. The types carry no storage
//! logic; `ebpf-store` encodes and persists them.

pub mod error;
pub mod guid;
pub mod id;
pub mod types;

// Re-export commonly used types
pub use error::{IdentifierError, TypeError};
pub use guid::{Guid, GUID_STRING_LENGTH};
pub use id::HelperId;
pub use types::{
    ContextDescriptor, HelperFunctionPrototype, HelperScope, ProgramFlags, ProgramInfo,
    ProgramSectionInfo, TypeTag, MAX_HELPER_ARGUMENTS,
};
