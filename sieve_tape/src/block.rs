// Copyright 2026 the Sieve Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Append-only byte blocks and the scalar codec that reads and writes them.
//!
//! A [`Block`] is one contiguous part of a compiled program. Addresses are plain byte offsets
//! into the block that owns them. Emission appends (returning the address of what was written);
//! the only in-place mutation is [`Block::update_data`], used to backpatch jump offsets once the
//! target is known.
//!
//! Layout of the scalar encodings:
//!
//! | value | encoding |
//! |---|---|
//! | byte | 1 raw byte |
//! | integer | big-endian base-128 VLQ |
//! | offset | 4 bytes, big-endian two's complement |
//! | string | VLQ length, payload, one `0x00` terminator |

use alloc::vec::Vec;
use core::fmt;

use crate::format::{DecodeError, read_vlq_u64, write_vlq_u64};

/// A byte offset into a [`Block`].
pub type Address = usize;

/// Size in bytes of an encoded jump offset.
pub const OFFSET_SIZE: usize = 4;

/// An emission failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EmitError {
    /// An in-place update would write outside the bytes emitted so far.
    AddressOutOfBounds {
        /// Start of the attempted write.
        address: Address,
        /// Length of the attempted write.
        len: usize,
    },
    /// A jump distance does not fit the 32-bit offset encoding.
    OffsetOverflow,
    /// An object code is not a member of the table it was emitted against.
    ObjectOutOfRange {
        /// The object code.
        code: u8,
        /// Number of members in the table.
        count: usize,
    },
    /// A block id does not exist in the builder.
    UnknownBlock {
        /// The invalid block id.
        block: u32,
    },
    /// The extension byte cannot address another extension.
    TooManyExtensions,
    /// A label was referenced but never placed.
    UnresolvedLabel,
    /// A label was placed twice.
    DuplicateLabel,
}

impl fmt::Display for EmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddressOutOfBounds { address, len } => {
                write!(f, "update of {len} bytes at {address:#x} is out of bounds")
            }
            Self::OffsetOverflow => write!(f, "jump offset does not fit in 32 bits"),
            Self::ObjectOutOfRange { code, count } => {
                write!(f, "object code {code} out of range for table of {count}")
            }
            Self::UnknownBlock { block } => write!(f, "unknown block {block}"),
            Self::TooManyExtensions => write!(f, "too many extensions for one program"),
            Self::UnresolvedLabel => write!(f, "label was referenced but never placed"),
            Self::DuplicateLabel => write!(f, "label was placed twice"),
        }
    }
}

impl core::error::Error for EmitError {}

/// A contiguous, append-only byte buffer holding part of a compiled program.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Block {
    data: Vec<u8>,
}

impl Block {
    /// Creates an empty block.
    #[must_use]
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Wraps already-encoded bytes.
    #[must_use]
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Returns the number of bytes emitted so far.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Returns the raw block contents.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    // Emission

    /// Appends `bytes`, returning the address they were written at.
    pub fn emit_data(&mut self, bytes: &[u8]) -> Address {
        let address = self.data.len();
        self.data.extend_from_slice(bytes);
        address
    }

    /// Appends one byte.
    pub fn emit_byte(&mut self, byte: u8) -> Address {
        self.emit_data(&[byte])
    }

    /// Overwrites previously emitted bytes. Never changes the block length.
    pub fn update_data(&mut self, address: Address, bytes: &[u8]) -> Result<(), EmitError> {
        let out_of_bounds = EmitError::AddressOutOfBounds {
            address,
            len: bytes.len(),
        };
        let end = address.checked_add(bytes.len()).ok_or(out_of_bounds.clone())?;
        let dst = self.data.get_mut(address..end).ok_or(out_of_bounds)?;
        dst.copy_from_slice(bytes);
        Ok(())
    }

    /// Appends an unsigned integer as a VLQ.
    pub fn emit_integer(&mut self, integer: u64) -> Address {
        let address = self.data.len();
        write_vlq_u64(&mut self.data, integer);
        address
    }

    /// Appends a 4-byte signed offset.
    ///
    /// Forward jumps emit `0` here and call [`Block::resolve_offset`] once the target is reached.
    pub fn emit_offset(&mut self, offset: i32) -> Address {
        self.emit_data(&offset.to_be_bytes())
    }

    /// Backpatches the offset at `address` with the distance from `address` to the current end
    /// of the block.
    pub fn resolve_offset(&mut self, address: Address) -> Result<(), EmitError> {
        let distance = self
            .data
            .len()
            .checked_sub(address)
            .ok_or(EmitError::AddressOutOfBounds {
                address,
                len: OFFSET_SIZE,
            })?;
        let offset = i32::try_from(distance).map_err(|_| EmitError::OffsetOverflow)?;
        self.update_data(address, &offset.to_be_bytes())
    }

    /// Appends a length-prefixed, zero-terminated byte string.
    pub fn emit_string(&mut self, bytes: &[u8]) -> Address {
        let address = self.emit_integer(bytes.len() as u64);
        self.data.extend_from_slice(bytes);
        self.data.push(0);
        address
    }

    /// Appends a UTF-8 string using the [`Block::emit_string`] encoding.
    pub fn emit_cstring(&mut self, s: &str) -> Address {
        self.emit_string(s.as_bytes())
    }

    /// Emits the selector for member `code` of a table with `count` members.
    ///
    /// Nothing is written for single-member tables: the member is implied on read.
    pub fn emit_extension_object(&mut self, count: usize, code: u8) -> Result<(), EmitError> {
        if usize::from(code) >= count {
            return Err(EmitError::ObjectOutOfRange { code, count });
        }
        if count > 1 {
            self.emit_byte(code);
        }
        Ok(())
    }

    // Decoding

    /// Reads one raw byte.
    pub fn read_byte(&self, cursor: &mut Address) -> Result<u8, DecodeError> {
        let b = *self.data.get(*cursor).ok_or(DecodeError::UnexpectedEof)?;
        *cursor += 1;
        Ok(b)
    }

    /// Reads a 4-byte big-endian signed offset.
    pub fn read_offset(&self, cursor: &mut Address) -> Result<i32, DecodeError> {
        let end = cursor
            .checked_add(OFFSET_SIZE)
            .ok_or(DecodeError::OutOfBounds)?;
        let b = self
            .data
            .get(*cursor..end)
            .ok_or(DecodeError::UnexpectedEof)?;
        *cursor = end;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a VLQ unsigned integer.
    pub fn read_integer(&self, cursor: &mut Address) -> Result<u64, DecodeError> {
        read_vlq_u64(&self.data, cursor)
    }

    /// Reads a VLQ unsigned integer that must fit in `u32`.
    pub fn read_unsigned(&self, cursor: &mut Address) -> Result<u32, DecodeError> {
        let mut at = *cursor;
        let v = read_vlq_u64(&self.data, &mut at)?;
        let v = u32::try_from(v).map_err(|_| DecodeError::InvalidVarint)?;
        *cursor = at;
        Ok(v)
    }

    /// Reads a length-prefixed, zero-terminated byte string.
    pub fn read_string(&self, cursor: &mut Address) -> Result<&[u8], DecodeError> {
        let mut at = *cursor;
        let len = read_vlq_u64(&self.data, &mut at)?;
        let remaining = self.data.len() - at;
        let len = usize::try_from(len)
            .ok()
            .filter(|&len| len < remaining)
            .ok_or(DecodeError::OutOfBounds)?;
        let payload = &self.data[at..at + len];
        if self.data[at + len] != 0 {
            return Err(DecodeError::MissingTerminator);
        }
        *cursor = at + len + 1;
        Ok(payload)
    }

    /// Reads a string and validates it as UTF-8.
    pub fn read_str(&self, cursor: &mut Address) -> Result<&str, DecodeError> {
        let mut at = *cursor;
        let s = core::str::from_utf8(self.read_string(&mut at)?)
            .map_err(|_| DecodeError::InvalidUtf8)?;
        *cursor = at;
        Ok(s)
    }

    /// Reads the selector for a table with `count` members and returns the member's code.
    ///
    /// An empty table fails without consuming anything; a single-member table consumes nothing
    /// and always yields code `0`.
    pub fn read_object_code(&self, cursor: &mut Address, count: usize) -> Result<u8, DecodeError> {
        match count {
            0 => Err(DecodeError::EmptyObjectTable),
            1 => Ok(0),
            _ => {
                let mut at = *cursor;
                let code = self.read_byte(&mut at)?;
                if usize::from(code) >= count {
                    return Err(DecodeError::UnknownObject { code });
                }
                *cursor = at;
                Ok(code)
            }
        }
    }

    /// Reads a member of `table` using the selector rule of
    /// [`Block::emit_extension_object`].
    pub fn read_extension_object<'t, T>(
        &self,
        cursor: &mut Address,
        table: &'t [T],
    ) -> Result<&'t T, DecodeError> {
        let code = self.read_object_code(cursor, table.len())?;
        table
            .get(usize::from(code))
            .ok_or(DecodeError::UnknownObject { code })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn emit_returns_start_address() {
        let mut b = Block::new();
        assert_eq!(b.emit_byte(7), 0);
        assert_eq!(b.emit_data(&[1, 2, 3]), 1);
        assert_eq!(b.emit_integer(300), 4);
        assert_eq!(b.size(), 6);
        assert_eq!(b.as_bytes(), &[7, 1, 2, 3, 0x82, 0x2C]);
    }

    #[test]
    fn update_data_never_grows_the_block() {
        let mut b = Block::from_bytes(vec![0; 4]);
        b.update_data(1, &[9, 9]).unwrap();
        assert_eq!(b.as_bytes(), &[0, 9, 9, 0]);
        assert_eq!(
            b.update_data(3, &[1, 1]),
            Err(EmitError::AddressOutOfBounds { address: 3, len: 2 })
        );
        assert_eq!(b.size(), 4);
    }

    #[test]
    fn offsets_are_big_endian_twos_complement() {
        let mut b = Block::new();
        b.emit_offset(-2);
        assert_eq!(b.as_bytes(), &[0xFF, 0xFF, 0xFF, 0xFE]);
        let mut cur = 0;
        assert_eq!(b.read_offset(&mut cur), Ok(-2));
        assert_eq!(cur, 4);
    }

    #[test]
    fn resolve_offset_points_at_current_end() {
        let mut b = Block::new();
        b.emit_byte(0xAA);
        let at = b.emit_offset(0);
        b.emit_data(&[0; 6]);
        b.resolve_offset(at).unwrap();
        let mut cur = at;
        assert_eq!(b.read_offset(&mut cur), Ok(10));
        assert_eq!(b.size(), 11);
    }

    #[test]
    fn string_layout_and_roundtrip() {
        let mut b = Block::new();
        b.emit_cstring("frop");
        assert_eq!(b.as_bytes(), &[4, b'f', b'r', b'o', b'p', 0]);
        let mut cur = 0;
        assert_eq!(b.read_string(&mut cur), Ok(&b"frop"[..]));
        assert_eq!(cur, 6);
    }

    #[test]
    fn string_with_bad_terminator_is_rejected() {
        let b = Block::from_bytes(vec![2, b'h', b'i', b'!']);
        let mut cur = 0;
        assert_eq!(b.read_string(&mut cur), Err(DecodeError::MissingTerminator));
        assert_eq!(cur, 0);
    }

    #[test]
    fn string_longer_than_block_is_rejected() {
        // Declared length 5 but only 3 bytes follow.
        let b = Block::from_bytes(vec![5, b'a', b'b', 0]);
        let mut cur = 0;
        assert_eq!(b.read_string(&mut cur), Err(DecodeError::OutOfBounds));

        // Payload fits but the terminator is missing.
        let b = Block::from_bytes(vec![3, b'a', b'b', b'c']);
        let mut cur = 0;
        assert_eq!(b.read_string(&mut cur), Err(DecodeError::OutOfBounds));
    }

    #[test]
    fn read_byte_at_end_is_eof() {
        let b = Block::from_bytes(vec![1]);
        let mut cur = 1;
        assert_eq!(b.read_byte(&mut cur), Err(DecodeError::UnexpectedEof));
        assert_eq!(cur, 1);
    }

    #[test]
    fn read_unsigned_rejects_wide_values() {
        let mut b = Block::new();
        b.emit_integer(u64::from(u32::MAX) + 1);
        let mut cur = 0;
        assert_eq!(b.read_unsigned(&mut cur), Err(DecodeError::InvalidVarint));
        assert_eq!(cur, 0);
        assert_eq!(b.read_integer(&mut cur), Ok(u64::from(u32::MAX) + 1));
    }

    #[test]
    fn extension_object_selector_depends_on_table_size() {
        let one = ["only"];
        let three = ["a", "b", "c"];

        let mut b = Block::new();
        b.emit_extension_object(one.len(), 0).unwrap();
        assert_eq!(b.size(), 0);
        b.emit_extension_object(three.len(), 2).unwrap();
        assert_eq!(b.as_bytes(), &[2]);
        assert_eq!(
            b.emit_extension_object(three.len(), 3),
            Err(EmitError::ObjectOutOfRange { code: 3, count: 3 })
        );

        let mut cur = 0;
        assert_eq!(b.read_extension_object(&mut cur, &one), Ok(&"only"));
        assert_eq!(cur, 0);
        assert_eq!(b.read_extension_object(&mut cur, &three), Ok(&"c"));
        assert_eq!(cur, 1);

        let empty: [&str; 0] = [];
        let mut cur = 0;
        assert_eq!(
            b.read_extension_object(&mut cur, &empty),
            Err(DecodeError::EmptyObjectTable)
        );
        assert_eq!(cur, 0);
    }

    #[test]
    fn out_of_range_selector_is_rejected() {
        let b = Block::from_bytes(vec![5]);
        let mut cur = 0;
        assert_eq!(
            b.read_extension_object(&mut cur, &["a", "b"]),
            Err(DecodeError::UnknownObject { code: 5 })
        );
    }
}
