//! Fixed-layout binary encoding of store records.
//!
//! Every record is written as **one composite blob** in a single value named
//! [`RECORD_VALUE_NAME`] under the record's key. The hive replaces a single
//! value atomically, so a reader sees either the previous record or the new
//! one, never a mix of fields from both.
//!
//! # Layout
//!
//! All integers are little-endian. Every blob starts with a two-byte header:
//!
//! | bytes | field |
//! |---|---|
//! | 1 | record kind ([`RecordKind`]) |
//! | 1 | layout version ([`CODEC_VERSION`]) |
//!
//! Strings are a `u16` byte length followed by UTF-8, at most
//! [`MAX_STRING_LENGTH`] bytes. GUIDs are their 16 raw bytes.
//!
//! Helper prototype and global helper (kinds 1 and 4):
//! `helper_id: u32`, `name: str`, `return_type: u8`,
//! `arguments: [u8; 5]`, `scope: u8` (0 global, 1 program),
//! `scope_guid: [u8; 16]` (all zero for global), `flags: u8`
//! (bit 0 = reallocate packet).
//!
//! Section info (kind 2): `provider: guid`, `program_type: guid`,
//! `attach_type: guid`, `bpf_program_type: u32`, `bpf_attach_type: u32`,
//! `section_prefix: str`.
//!
//! Program info (kind 3): `provider: guid`, `program_type: guid`,
//! `name: str`, `context_size: u32`, `data: i32`, `end: i32`, `meta: i32`,
//! `bpf_program_type: u32`, `flags: u32`, `helper_count: u32`, then
//! `helper_count` × `helper_id: u32`.
//!
//! Decoding rejects anything the encoder could not have produced: unknown
//! kinds, versions, tags, scope markers or flag bits, out-of-bounds lengths,
//! non-zero padding and trailing bytes.

use std::fmt;

use thiserror::Error;

use ebpf_store_types::{
    ContextDescriptor, Guid, HelperFunctionPrototype, HelperId, HelperScope, ProgramFlags,
    ProgramInfo, ProgramSectionInfo, TypeError, TypeTag, MAX_HELPER_ARGUMENTS,
};

use crate::hive::{KEY_SEPARATOR, MAX_KEY_NAME_LENGTH};

/// Name of the value holding a record's blob.
pub const RECORD_VALUE_NAME: &str = "record";

/// Current layout version.
pub const CODEC_VERSION: u8 = 1;

/// Longest encoded string, in bytes. Matches the hive's key name limit so
/// a section prefix always fits in a key name.
pub const MAX_STRING_LENGTH: usize = MAX_KEY_NAME_LENGTH;

/// Most helper IDs a program record may list.
pub const MAX_ALLOWED_HELPERS: usize = 4096;

const SCOPE_GLOBAL: u8 = 0;
const SCOPE_PROGRAM: u8 = 1;
const HELPER_FLAG_REALLOCATE_PACKET: u8 = 0x1;

/// The four record kinds stored in the hive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordKind {
    /// Program-scoped helper under a provider key.
    HelperPrototype = 1,
    SectionInfo = 2,
    ProgramInfo = 3,
    /// Helper visible to every program type.
    GlobalHelper = 4,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordKind::HelperPrototype => "helper prototype",
            RecordKind::SectionInfo => "section info",
            RecordKind::ProgramInfo => "program info",
            RecordKind::GlobalHelper => "global helper",
        };
        f.write_str(name)
    }
}

/// Structural violations found while encoding or decoding a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("record truncated: {field} needs {needed} bytes, {remaining} remaining")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("expected {expected} record, found kind {found}")]
    UnexpectedKind { expected: RecordKind, found: u8 },

    #[error("unsupported record layout version {0}")]
    UnsupportedVersion(u8),

    #[error("{field} is {len} bytes, limit is {max}")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    #[error("invalid {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),
}

// ---------------------------------------------------------------------------
// Public encode/decode entry points
// ---------------------------------------------------------------------------

/// Encodes a program-scoped helper stored under a provider key.
pub fn encode_helper_prototype(proto: &HelperFunctionPrototype) -> Result<Vec<u8>, CodecError> {
    if proto.is_global() {
        return Err(CodecError::InvalidField {
            field: "scope",
            reason: "provider helpers must be scoped to a program type",
        });
    }
    encode_helper(RecordKind::HelperPrototype, proto)
}

pub fn decode_helper_prototype(bytes: &[u8]) -> Result<HelperFunctionPrototype, CodecError> {
    let proto = decode_helper(RecordKind::HelperPrototype, bytes)?;
    if proto.is_global() {
        return Err(CodecError::InvalidField {
            field: "scope",
            reason: "provider helpers must be scoped to a program type",
        });
    }
    Ok(proto)
}

/// Encodes a helper stored under the global helper key.
pub fn encode_global_helper(proto: &HelperFunctionPrototype) -> Result<Vec<u8>, CodecError> {
    if !proto.is_global() {
        return Err(CodecError::InvalidField {
            field: "scope",
            reason: "global helpers must have global scope",
        });
    }
    encode_helper(RecordKind::GlobalHelper, proto)
}

pub fn decode_global_helper(bytes: &[u8]) -> Result<HelperFunctionPrototype, CodecError> {
    let proto = decode_helper(RecordKind::GlobalHelper, bytes)?;
    if !proto.is_global() {
        return Err(CodecError::InvalidField {
            field: "scope",
            reason: "global helpers must have global scope",
        });
    }
    Ok(proto)
}

pub fn encode_section_info(section: &ProgramSectionInfo) -> Result<Vec<u8>, CodecError> {
    validate_section_prefix(&section.section_prefix)?;

    let mut enc = Encoder::new(RecordKind::SectionInfo);
    enc.guid(&section.provider);
    enc.guid(&section.program_type);
    enc.guid(&section.attach_type);
    enc.u32(section.bpf_program_type);
    enc.u32(section.bpf_attach_type);
    enc.str("section_prefix", &section.section_prefix)?;
    Ok(enc.finish())
}

pub fn decode_section_info(bytes: &[u8]) -> Result<ProgramSectionInfo, CodecError> {
    let mut dec = Decoder::new(RecordKind::SectionInfo, bytes)?;
    let section = ProgramSectionInfo {
        provider: dec.guid("provider")?,
        program_type: dec.guid("program_type")?,
        attach_type: dec.guid("attach_type")?,
        bpf_program_type: dec.u32("bpf_program_type")?,
        bpf_attach_type: dec.u32("bpf_attach_type")?,
        section_prefix: dec.str("section_prefix")?,
    };
    dec.finish()?;
    validate_section_prefix(&section.section_prefix)?;
    Ok(section)
}

pub fn encode_program_info(program: &ProgramInfo) -> Result<Vec<u8>, CodecError> {
    if program.allowed_helpers.len() > MAX_ALLOWED_HELPERS {
        return Err(CodecError::TooLong {
            field: "allowed_helpers",
            len: program.allowed_helpers.len(),
            max: MAX_ALLOWED_HELPERS,
        });
    }

    let mut enc = Encoder::new(RecordKind::ProgramInfo);
    enc.guid(&program.provider);
    enc.guid(&program.program_type);
    enc.str("name", &program.name)?;
    enc.u32(program.context.size);
    enc.i32(program.context.data);
    enc.i32(program.context.end);
    enc.i32(program.context.meta);
    enc.u32(program.bpf_program_type);
    enc.u32(program.flags.bits());
    // Length checked against MAX_ALLOWED_HELPERS above.
    enc.u32(program.allowed_helpers.len() as u32);
    for helper in &program.allowed_helpers {
        enc.u32(helper.0);
    }
    Ok(enc.finish())
}

pub fn decode_program_info(bytes: &[u8]) -> Result<ProgramInfo, CodecError> {
    let mut dec = Decoder::new(RecordKind::ProgramInfo, bytes)?;
    let provider = dec.guid("provider")?;
    let program_type = dec.guid("program_type")?;
    let name = dec.str("name")?;
    let context = ContextDescriptor {
        size: dec.u32("context.size")?,
        data: dec.i32("context.data")?,
        end: dec.i32("context.end")?,
        meta: dec.i32("context.meta")?,
    };
    let bpf_program_type = dec.u32("bpf_program_type")?;
    let flags = ProgramFlags::from_bits(dec.u32("flags")?)?;

    let count = dec.u32("helper_count")? as usize;
    if count > MAX_ALLOWED_HELPERS {
        return Err(CodecError::TooLong {
            field: "allowed_helpers",
            len: count,
            max: MAX_ALLOWED_HELPERS,
        });
    }
    let mut allowed_helpers = Vec::with_capacity(count);
    for _ in 0..count {
        allowed_helpers.push(HelperId(dec.u32("allowed_helpers")?));
    }
    dec.finish()?;

    Ok(ProgramInfo {
        provider,
        program_type,
        name,
        context,
        allowed_helpers,
        bpf_program_type,
        flags,
    })
}

// ---------------------------------------------------------------------------
// Helper prototypes
// ---------------------------------------------------------------------------

fn encode_helper(kind: RecordKind, proto: &HelperFunctionPrototype) -> Result<Vec<u8>, CodecError> {
    validate_signature(proto.return_type, &proto.arguments)?;

    let mut enc = Encoder::new(kind);
    enc.u32(proto.helper_id.0);
    enc.str("name", &proto.name)?;
    enc.u8(proto.return_type.as_u8());
    for tag in proto.arguments {
        enc.u8(tag.as_u8());
    }
    match proto.scope {
        HelperScope::Global => {
            enc.u8(SCOPE_GLOBAL);
            enc.guid(&Guid::NIL);
        }
        HelperScope::Program(program_type) => {
            enc.u8(SCOPE_PROGRAM);
            enc.guid(&program_type);
        }
    }
    enc.u8(if proto.reallocate_packet {
        HELPER_FLAG_REALLOCATE_PACKET
    } else {
        0
    });
    Ok(enc.finish())
}

fn decode_helper(kind: RecordKind, bytes: &[u8]) -> Result<HelperFunctionPrototype, CodecError> {
    let mut dec = Decoder::new(kind, bytes)?;
    let helper_id = HelperId(dec.u32("helper_id")?);
    let name = dec.str("name")?;
    let return_type = TypeTag::try_from(dec.u8("return_type")?)?;
    let mut arguments = [TypeTag::None; MAX_HELPER_ARGUMENTS];
    for slot in arguments.iter_mut() {
        *slot = TypeTag::try_from(dec.u8("arguments")?)?;
    }
    validate_signature(return_type, &arguments)?;

    let scope_tag = dec.u8("scope")?;
    let scope_guid = dec.guid("scope_guid")?;
    let scope = match scope_tag {
        SCOPE_GLOBAL if scope_guid.is_nil() => HelperScope::Global,
        SCOPE_GLOBAL => {
            return Err(CodecError::InvalidField {
                field: "scope_guid",
                reason: "global scope carries a program type",
            })
        }
        SCOPE_PROGRAM => HelperScope::Program(scope_guid),
        _ => {
            return Err(CodecError::InvalidField {
                field: "scope",
                reason: "unknown scope marker",
            })
        }
    };

    let flags = dec.u8("flags")?;
    if flags & !HELPER_FLAG_REALLOCATE_PACKET != 0 {
        return Err(CodecError::InvalidField {
            field: "flags",
            reason: "unknown helper flag bits",
        });
    }
    dec.finish()?;

    Ok(HelperFunctionPrototype {
        helper_id,
        name,
        return_type,
        arguments,
        scope,
        reallocate_packet: flags & HELPER_FLAG_REALLOCATE_PACKET != 0,
    })
}

/// Return type must not be `None`; used argument slots come first and
/// every slot after the first `None` is `None`.
fn validate_signature(
    return_type: TypeTag,
    arguments: &[TypeTag; MAX_HELPER_ARGUMENTS],
) -> Result<(), CodecError> {
    if !return_type.is_valid_return() {
        return Err(CodecError::InvalidField {
            field: "return_type",
            reason: "the unused-slot tag is not a return type",
        });
    }
    let arity = arguments.iter().take_while(|tag| !tag.is_none()).count();
    if arguments[..arity].iter().any(|tag| !tag.is_valid_argument()) {
        return Err(CodecError::InvalidField {
            field: "arguments",
            reason: "void is not an argument type",
        });
    }
    if arguments[arity..].iter().any(|tag| !tag.is_none()) {
        return Err(CodecError::InvalidField {
            field: "arguments",
            reason: "argument follows an unused slot",
        });
    }
    Ok(())
}

/// Whether `prefix` could ever be the name of a stored section record.
pub(crate) fn is_storable_section_prefix(prefix: &str) -> bool {
    prefix.len() <= MAX_STRING_LENGTH && validate_section_prefix(prefix).is_ok()
}

fn validate_section_prefix(prefix: &str) -> Result<(), CodecError> {
    if prefix.is_empty() {
        return Err(CodecError::InvalidField {
            field: "section_prefix",
            reason: "empty",
        });
    }
    if prefix.contains(KEY_SEPARATOR) || prefix.contains('\\') || prefix.chars().any(char::is_control) {
        return Err(CodecError::InvalidField {
            field: "section_prefix",
            reason: "contains a key separator or control character",
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Byte-level encoder / decoder
// ---------------------------------------------------------------------------

struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    fn new(kind: RecordKind) -> Self {
        Encoder {
            buf: vec![kind as u8, CODEC_VERSION],
        }
    }

    fn u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    fn u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn guid(&mut self, guid: &Guid) {
        self.buf.extend_from_slice(&guid.to_bytes());
    }

    fn str(&mut self, field: &'static str, value: &str) -> Result<(), CodecError> {
        if value.len() > MAX_STRING_LENGTH {
            return Err(CodecError::TooLong {
                field,
                len: value.len(),
                max: MAX_STRING_LENGTH,
            });
        }
        // Bounded by MAX_STRING_LENGTH, which fits in u16.
        self.buf.extend_from_slice(&(value.len() as u16).to_le_bytes());
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }
}

struct Decoder<'a> {
    bytes: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Consumes and checks the header.
    fn new(kind: RecordKind, bytes: &'a [u8]) -> Result<Self, CodecError> {
        let mut dec = Decoder { bytes };
        let found = dec.u8("kind")?;
        if found != kind as u8 {
            return Err(CodecError::UnexpectedKind {
                expected: kind,
                found,
            });
        }
        let version = dec.u8("version")?;
        if version != CODEC_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        Ok(dec)
    }

    fn take<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], CodecError> {
        let (head, rest) = self.split(field, N)?;
        self.bytes = rest;
        let mut out = [0u8; N];
        out.copy_from_slice(head);
        Ok(out)
    }

    fn split(&self, field: &'static str, needed: usize) -> Result<(&'a [u8], &'a [u8]), CodecError> {
        if self.bytes.len() < needed {
            return Err(CodecError::Truncated {
                field,
                needed,
                remaining: self.bytes.len(),
            });
        }
        Ok(self.bytes.split_at(needed))
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, CodecError> {
        Ok(self.take::<1>(field)?[0])
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.take(field)?))
    }

    fn i32(&mut self, field: &'static str) -> Result<i32, CodecError> {
        Ok(i32::from_le_bytes(self.take(field)?))
    }

    fn guid(&mut self, field: &'static str) -> Result<Guid, CodecError> {
        Ok(Guid::from_bytes(self.take(field)?))
    }

    fn str(&mut self, field: &'static str) -> Result<String, CodecError> {
        let len = usize::from(u16::from_le_bytes(self.take(field)?));
        if len > MAX_STRING_LENGTH {
            return Err(CodecError::TooLong {
                field,
                len,
                max: MAX_STRING_LENGTH,
            });
        }
        let (head, rest) = self.split(field, len)?;
        self.bytes = rest;
        std::str::from_utf8(head)
            .map(str::to_string)
            .map_err(|_| CodecError::InvalidUtf8 { field })
    }

    fn finish(self) -> Result<(), CodecError> {
        if !self.bytes.is_empty() {
            return Err(CodecError::TrailingBytes(self.bytes.len()));
        }
        Ok(())
    }
}
