// Copyright 2026 the Sieve Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Big-endian base-128 variable-length quantities.
//!
//! Each 7-bit group is emitted most-significant first. Every byte except the last carries the
//! continuation bit (`0x80`).

use alloc::vec::Vec;

use super::DecodeError;

/// Largest accumulator value that can still be shifted left by 7 without losing bits.
const SHIFT_LIMIT: u64 = u64::MAX >> 7;

/// Appends the minimal VLQ encoding of `v` to `out`.
pub fn write_vlq_u64(out: &mut Vec<u8>, v: u64) {
    // u64 needs at most ceil(64 / 7) = 10 groups.
    let mut buf = [0_u8; 10];
    let mut pos = buf.len() - 1;
    buf[pos] = (v & 0x7F) as u8;
    let mut rest = v >> 7;
    while rest > 0 {
        pos -= 1;
        buf[pos] = ((rest & 0x7F) as u8) | 0x80;
        rest >>= 7;
    }
    out.extend_from_slice(&buf[pos..]);
}

/// Returns the number of bytes [`write_vlq_u64`] emits for `v`.
#[must_use]
pub fn vlq_len(v: u64) -> usize {
    let bits = 64 - v.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Reads a VLQ starting at `*offset`.
///
/// `*offset` is advanced past the consumed bytes only on success. Values that do not fit in
/// `u64` are rejected with [`DecodeError::InvalidVarint`] rather than wrapped.
pub fn read_vlq_u64(bytes: &[u8], offset: &mut usize) -> Result<u64, DecodeError> {
    let mut pos = *offset;
    let mut value: u64 = 0;
    loop {
        let b = *bytes.get(pos).ok_or(DecodeError::UnexpectedEof)?;
        pos += 1;
        if value > SHIFT_LIMIT {
            return Err(DecodeError::InvalidVarint);
        }
        value = (value << 7) | u64::from(b & 0x7F);
        if b & 0x80 == 0 {
            break;
        }
    }
    *offset = pos;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn encode(v: u64) -> Vec<u8> {
        let mut out = Vec::new();
        write_vlq_u64(&mut out, v);
        out
    }

    #[test]
    fn small_values_are_one_byte() {
        assert_eq!(encode(0), vec![0x00]);
        assert_eq!(encode(1), vec![0x01]);
        assert_eq!(encode(127), vec![0x7F]);
    }

    #[test]
    fn groups_are_big_endian_with_continuation() {
        assert_eq!(encode(128), vec![0x81, 0x00]);
        assert_eq!(encode(300), vec![0x82, 0x2C]);
        assert_eq!(encode(16_383), vec![0xFF, 0x7F]);
        assert_eq!(encode(16_384), vec![0x81, 0x80, 0x00]);
    }

    #[test]
    fn max_value_roundtrips_in_ten_bytes() {
        let bytes = encode(u64::MAX);
        assert_eq!(bytes.len(), 10);
        assert_eq!(bytes[0], 0x81);
        let mut off = 0;
        assert_eq!(read_vlq_u64(&bytes, &mut off), Ok(u64::MAX));
        assert_eq!(off, 10);
    }

    #[test]
    fn vlq_len_matches_encoding() {
        for v in [0, 1, 127, 128, 300, 16_383, 16_384, u64::from(u32::MAX), u64::MAX] {
            assert_eq!(vlq_len(v), encode(v).len(), "len mismatch for {v}");
        }
    }

    #[test]
    fn truncated_sequence_is_eof_and_cursor_is_kept() {
        let bytes = [0x81, 0x80];
        let mut off = 0;
        assert_eq!(
            read_vlq_u64(&bytes, &mut off),
            Err(DecodeError::UnexpectedEof)
        );
        assert_eq!(off, 0);
    }

    #[test]
    fn overflow_is_rejected() {
        // 11 groups carrying a set top bit cannot fit in 64 bits.
        let mut bytes = vec![0xFF; 10];
        bytes.push(0x7F);
        let mut off = 0;
        assert_eq!(
            read_vlq_u64(&bytes, &mut off),
            Err(DecodeError::InvalidVarint)
        );

        // 2^64 exactly: one more than u64::MAX.
        let bytes = [0x82, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x00];
        let mut off = 0;
        assert_eq!(
            read_vlq_u64(&bytes, &mut off),
            Err(DecodeError::InvalidVarint)
        );
    }

    #[test]
    fn redundant_leading_groups_are_tolerated() {
        let bytes = [0x80, 0x80, 0x05];
        let mut off = 0;
        assert_eq!(read_vlq_u64(&bytes, &mut off), Ok(5));
        assert_eq!(off, 3);
    }
}
