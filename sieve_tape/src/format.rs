// Copyright 2026 the Sieve Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Encoding/decoding primitives shared by blocks and the binary container.

mod vlq;

pub use vlq::{read_vlq_u64, vlq_len, write_vlq_u64};

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

/// A decode error for compiled filter programs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Input ended unexpectedly.
    UnexpectedEof,
    /// A variable-length integer overflowed its target width.
    InvalidVarint,
    /// A length, address or offset was out of bounds.
    OutOfBounds,
    /// The byte following a string payload was not the zero terminator.
    MissingTerminator,
    /// A string was expected to be UTF-8 but was not.
    InvalidUtf8,
    /// The container magic did not match.
    BadMagic,
    /// The container format version is not supported by this decoder.
    UnsupportedVersion {
        /// Major format version.
        major: u16,
        /// Minor format version.
        minor: u16,
    },
    /// A container section was repeated.
    DuplicateSection,
    /// A required container section was missing.
    MissingSection {
        /// The required section tag.
        tag: u8,
    },
    /// An extension index is not part of this program's extension table.
    UnknownExtension {
        /// The per-program extension index.
        index: u32,
    },
    /// A container referenced an extension the registry does not know.
    UnknownExtensionName {
        /// The extension name stored in the container.
        name: String,
    },
    /// A container listed the same extension twice.
    DuplicateExtension {
        /// The repeated extension name.
        name: String,
    },
    /// Two extensions in a container claimed the same private block.
    DuplicateExtensionBlock {
        /// The shared block id.
        block: u32,
    },
    /// An operation code did not resolve to an operation.
    UnknownOpcode {
        /// The raw code byte.
        code: u8,
    },
    /// An object selector did not resolve to an object.
    UnknownObject {
        /// The raw selector byte.
        code: u8,
    },
    /// An object reference pointed at a table with no members.
    EmptyObjectTable,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "unexpected end of input"),
            Self::InvalidVarint => write!(f, "invalid or overflowing integer encoding"),
            Self::OutOfBounds => write!(f, "out of bounds"),
            Self::MissingTerminator => write!(f, "string is not zero-terminated"),
            Self::InvalidUtf8 => write!(f, "invalid UTF-8"),
            Self::BadMagic => write!(f, "bad magic header"),
            Self::UnsupportedVersion { major, minor } => {
                write!(f, "unsupported version {major}.{minor}")
            }
            Self::DuplicateSection => write!(f, "duplicate section"),
            Self::MissingSection { tag } => write!(f, "missing required section {tag}"),
            Self::UnknownExtension { index } => write!(f, "unknown extension index {index}"),
            Self::UnknownExtensionName { name } => write!(f, "unknown extension '{name}'"),
            Self::DuplicateExtension { name } => write!(f, "extension '{name}' listed twice"),
            Self::DuplicateExtensionBlock { block } => {
                write!(f, "block {block} is claimed by more than one extension")
            }
            Self::UnknownOpcode { code } => write!(f, "unknown operation code {code}"),
            Self::UnknownObject { code } => write!(f, "unknown object code {code}"),
            Self::EmptyObjectTable => write!(f, "object table is empty"),
        }
    }
}

impl core::error::Error for DecodeError {}

/// A simple byte reader with bounds checks.
#[derive(Clone, Debug)]
pub struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    /// Creates a reader over `bytes`.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    /// Returns `true` once every byte has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offset >= self.bytes.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .offset
            .checked_add(len)
            .ok_or(DecodeError::OutOfBounds)?;
        let slice = self
            .bytes
            .get(self.offset..end)
            .ok_or(DecodeError::UnexpectedEof)?;
        self.offset = end;
        Ok(slice)
    }

    /// Reads a `u8`.
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    /// Reads a little-endian `u16`.
    pub fn read_u16_le(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Reads a VLQ integer as `u64`.
    pub fn read_vlq_u64(&mut self) -> Result<u64, DecodeError> {
        read_vlq_u64(self.bytes, &mut self.offset)
    }

    /// Reads a VLQ integer that must fit in `u32`.
    pub fn read_vlq_u32(&mut self) -> Result<u32, DecodeError> {
        let v = self.read_vlq_u64()?;
        u32::try_from(v).map_err(|_| DecodeError::InvalidVarint)
    }

    /// Reads a VLQ length and checks it against the remaining input.
    pub fn read_len(&mut self) -> Result<usize, DecodeError> {
        let v = self.read_vlq_u64()?;
        let len = usize::try_from(v).map_err(|_| DecodeError::OutOfBounds)?;
        if len > self.bytes.len() - self.offset {
            return Err(DecodeError::OutOfBounds);
        }
        Ok(len)
    }

    /// Reads `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        self.take(len)
    }

    /// Reads `len` bytes and validates UTF-8.
    pub fn read_str(&mut self, len: usize) -> Result<&'a str, DecodeError> {
        let b = self.take(len)?;
        core::str::from_utf8(b).map_err(|_| DecodeError::InvalidUtf8)
    }
}

/// A simple byte writer.
#[derive(Clone, Debug, Default)]
pub struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    /// Returns a reference to the written bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the writer and returns the underlying byte buffer.
    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }

    /// Appends a `u8`.
    pub fn write_u8(&mut self, v: u8) {
        self.bytes.push(v);
    }

    /// Appends a little-endian `u16`.
    pub fn write_u16_le(&mut self, v: u16) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    /// Appends a VLQ integer.
    pub fn write_vlq_u64(&mut self, v: u64) {
        write_vlq_u64(&mut self.bytes, v);
    }

    /// Appends a VLQ length followed by `b`.
    pub fn write_len_prefixed(&mut self, b: &[u8]) {
        self.write_vlq_u64(b.len() as u64);
        self.bytes.extend_from_slice(b);
    }

    /// Appends raw bytes.
    pub fn write_bytes(&mut self, b: &[u8]) {
        self.bytes.extend_from_slice(b);
    }
}
