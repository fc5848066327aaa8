//! Record types published to the program-type store.
//!
//! Three record shapes describe what a provider contributes:
//! - [`ProgramInfo`]: one program type, its context layout and the helpers
//!   it may call.
//! - [`ProgramSectionInfo`]: a section-name convention mapping to a
//!   program type and attach type.
//! - [`HelperFunctionPrototype`]: the signature of one helper, valid for one
//!   program type or for every program type.

use std::ops::BitOr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::guid::Guid;
use crate::id::HelperId;

/// Fixed number of argument slots in a helper prototype.
pub const MAX_HELPER_ARGUMENTS: usize = 5;

/// Type tag for a helper's return value or one of its arguments.
///
/// `None` is reserved: it marks an unused argument slot and is never a
/// valid return type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TypeTag {
    #[default]
    None = 0,
    Void = 1,
    Int32 = 2,
    Int64 = 3,
    Ptr = 4,
    PtrToCtx = 5,
    PtrToMap = 6,
    PtrToMapKey = 7,
    PtrToMapValue = 8,
    PtrToMapValueOrNull = 9,
    PtrToReadableMem = 10,
    PtrToWritableMem = 11,
    ConstSize = 12,
    ConstSizeOrZero = 13,
}

impl TypeTag {
    /// Every tag, in discriminant order.
    pub const ALL: [TypeTag; 14] = [
        TypeTag::None,
        TypeTag::Void,
        TypeTag::Int32,
        TypeTag::Int64,
        TypeTag::Ptr,
        TypeTag::PtrToCtx,
        TypeTag::PtrToMap,
        TypeTag::PtrToMapKey,
        TypeTag::PtrToMapValue,
        TypeTag::PtrToMapValueOrNull,
        TypeTag::PtrToReadableMem,
        TypeTag::PtrToWritableMem,
        TypeTag::ConstSize,
        TypeTag::ConstSizeOrZero,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_none(self) -> bool {
        self == TypeTag::None
    }

    /// Whether the tag may appear in a used argument slot.
    pub fn is_valid_argument(self) -> bool {
        !matches!(self, TypeTag::None | TypeTag::Void)
    }

    /// Whether the tag may be a helper's return type.
    pub fn is_valid_return(self) -> bool {
        !self.is_none()
    }
}

impl TryFrom<u8> for TypeTag {
    type Error = TypeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        TypeTag::ALL
            .get(usize::from(value))
            .copied()
            .ok_or(TypeError::UnknownTypeTag(value))
    }
}

/// Where a helper prototype is callable from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HelperScope {
    /// Callable from every program type.
    Global,
    /// Callable only from the given program type.
    Program(Guid),
}

/// The callable signature of one helper function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelperFunctionPrototype {
    pub helper_id: HelperId,
    pub name: String,
    pub return_type: TypeTag,
    /// Argument tags; unused trailing slots hold [`TypeTag::None`].
    pub arguments: [TypeTag; MAX_HELPER_ARGUMENTS],
    pub scope: HelperScope,
    /// The helper may reallocate the packet buffer, invalidating packet
    /// pointers held by the caller.
    #[serde(default)]
    pub reallocate_packet: bool,
}

impl HelperFunctionPrototype {
    /// Builds a prototype, padding `arguments` with [`TypeTag::None`].
    ///
    /// Returns [`TypeError::TooManyArguments`] if more than
    /// [`MAX_HELPER_ARGUMENTS`] tags are given.
    pub fn new(
        helper_id: HelperId,
        name: impl Into<String>,
        return_type: TypeTag,
        arguments: &[TypeTag],
        scope: HelperScope,
    ) -> Result<Self, TypeError> {
        if arguments.len() > MAX_HELPER_ARGUMENTS {
            return Err(TypeError::TooManyArguments {
                count: arguments.len(),
                max: MAX_HELPER_ARGUMENTS,
            });
        }
        let mut slots = [TypeTag::None; MAX_HELPER_ARGUMENTS];
        slots[..arguments.len()].copy_from_slice(arguments);

        Ok(HelperFunctionPrototype {
            helper_id,
            name: name.into(),
            return_type,
            arguments: slots,
            scope,
            reallocate_packet: false,
        })
    }

    pub fn with_reallocate_packet(mut self, reallocate_packet: bool) -> Self {
        self.reallocate_packet = reallocate_packet;
        self
    }

    /// Number of leading argument slots in use.
    pub fn arity(&self) -> usize {
        self.arguments.iter().take_while(|tag| !tag.is_none()).count()
    }

    /// The used argument slots.
    pub fn argument_types(&self) -> &[TypeTag] {
        &self.arguments[..self.arity()]
    }

    pub fn is_global(&self) -> bool {
        self.scope == HelperScope::Global
    }
}

/// Offsets of the packet pointers inside a program's context structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextDescriptor {
    /// Size of the context structure in bytes.
    pub size: u32,
    pub data: i32,
    pub end: i32,
    pub meta: i32,
}

impl ContextDescriptor {
    /// Offset value marking a pointer the context does not carry.
    pub const ABSENT: i32 = -1;

    /// A context of `size` bytes with no packet pointers.
    pub fn new(size: u32) -> Self {
        ContextDescriptor {
            size,
            data: Self::ABSENT,
            end: Self::ABSENT,
            meta: Self::ABSENT,
        }
    }

    pub fn with_packet(mut self, data: i32, end: i32) -> Self {
        self.data = data;
        self.end = end;
        self
    }

    pub fn with_meta(mut self, meta: i32) -> Self {
        self.meta = meta;
        self
    }
}

/// Bitness and privilege flags of a program type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct ProgramFlags(u32);

impl ProgramFlags {
    /// Programs of this type are compiled for a 64-bit ABI.
    pub const IS_64_BIT: ProgramFlags = ProgramFlags(0x1);
    /// Loading programs of this type requires elevated privileges.
    pub const PRIVILEGED: ProgramFlags = ProgramFlags(0x2);

    const KNOWN_BITS: u32 = 0x3;

    pub const fn empty() -> Self {
        ProgramFlags(0)
    }

    /// Validates raw bits against the known flag set.
    pub fn from_bits(bits: u32) -> Result<Self, TypeError> {
        if bits & !Self::KNOWN_BITS != 0 {
            return Err(TypeError::UnknownProgramFlags(bits & !Self::KNOWN_BITS));
        }
        Ok(ProgramFlags(bits))
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: ProgramFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ProgramFlags {
    type Output = ProgramFlags;

    fn bitor(self, rhs: ProgramFlags) -> ProgramFlags {
        ProgramFlags(self.0 | rhs.0)
    }
}

impl TryFrom<u32> for ProgramFlags {
    type Error = TypeError;

    fn try_from(bits: u32) -> Result<Self, Self::Error> {
        ProgramFlags::from_bits(bits)
    }
}

impl From<ProgramFlags> for u32 {
    fn from(flags: ProgramFlags) -> Self {
        flags.0
    }
}

/// Description of one program type contributed by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramInfo {
    /// Provider namespace the record is published under.
    pub provider: Guid,
    pub program_type: Guid,
    pub name: String,
    pub context: ContextDescriptor,
    /// Helpers programs of this type may call, in publication order.
    pub allowed_helpers: Vec<HelperId>,
    /// Native program type number for tooling that speaks numeric types.
    pub bpf_program_type: u32,
    pub flags: ProgramFlags,
}

/// A section-name convention that maps to a program type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramSectionInfo {
    /// Provider namespace the record is published under.
    pub provider: Guid,
    pub program_type: Guid,
    /// Section-name pattern, e.g. `xdp` or `bind`.
    pub section_prefix: String,
    pub attach_type: Guid,
    pub bpf_program_type: u32,
    pub bpf_attach_type: u32,
}
