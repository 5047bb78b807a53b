//! Byte-slice utilities for bounds-oriented parsing.
//!
//! This module provides a consistent way to read little-endian primitives out of `&[u8]` at
//! fixed offsets. Nothing here ever reads past the end of the slice.
//!
//! There are two layers:
//! - **Option layer** (`read_*`): helpers that return `Option<T>`.
//! - **Result layer** (`*_r`): wrappers that map `None` to `DeserializationError::OutOfBounds`.
//!
//! Offsets are `usize` and are interpreted relative to the slice you pass in. Errors report
//! `base + offset`, so callers holding a sub-slice of a chunk still get chunk-relative offsets.
//!
//! Example (fixed-size header parsing):
//!
//! ```ignore
//! use crate::utils::bytes;
//!
//! // Ensure the struct is present, then read fields by fixed offsets.
//! let _ = bytes::slice_r(buf, 0, 24, 0, "record header")?;
//! let size = bytes::read_u32_le_r(buf, 4, 0, "record size")?;
//! ```

use crate::err::DeserializationError;

use byteorder::{ByteOrder, LittleEndian};

/// Read `N` raw bytes at `offset`.
///
/// Returns `None` if the range is out of bounds.
pub(crate) fn read_array<const N: usize>(buf: &[u8], offset: usize) -> Option<[u8; N]> {
    let end = offset.checked_add(N)?;
    buf.get(offset..end)?.try_into().ok()
}

/// Read a single byte at `offset`.
pub(crate) fn read_u8(buf: &[u8], offset: usize) -> Option<u8> {
    buf.get(offset).copied()
}

/// Read a `u16` (little-endian) at `offset`.
pub(crate) fn read_u16_le(buf: &[u8], offset: usize) -> Option<u16> {
    Some(LittleEndian::read_u16(&read_array::<2>(buf, offset)?))
}

/// Read a `u32` (little-endian) at `offset`.
pub(crate) fn read_u32_le(buf: &[u8], offset: usize) -> Option<u32> {
    Some(LittleEndian::read_u32(&read_array::<4>(buf, offset)?))
}

/// Read a `u64` (little-endian) at `offset`.
pub(crate) fn read_u64_le(buf: &[u8], offset: usize) -> Option<u64> {
    Some(LittleEndian::read_u64(&read_array::<8>(buf, offset)?))
}

#[inline]
pub(crate) fn out_of_bounds(
    what: &'static str,
    base: u64,
    offset: usize,
    need: usize,
    len: usize,
) -> DeserializationError {
    DeserializationError::OutOfBounds {
        what,
        offset: base.saturating_add(offset as u64),
        need,
        have: len.saturating_sub(offset),
    }
}

/// Borrow `len` bytes at `offset`, or return `DeserializationError::OutOfBounds`.
pub(crate) fn slice_r<'a>(
    buf: &'a [u8],
    offset: usize,
    len: usize,
    base: u64,
    what: &'static str,
) -> Result<&'a [u8], DeserializationError> {
    let end = offset
        .checked_add(len)
        .ok_or_else(|| out_of_bounds(what, base, offset, len, buf.len()))?;
    buf.get(offset..end)
        .ok_or_else(|| out_of_bounds(what, base, offset, len, buf.len()))
}

/// Read `N` raw bytes at `offset`, or return `DeserializationError::OutOfBounds`.
pub(crate) fn read_array_r<const N: usize>(
    buf: &[u8],
    offset: usize,
    base: u64,
    what: &'static str,
) -> Result<[u8; N], DeserializationError> {
    read_array::<N>(buf, offset).ok_or_else(|| out_of_bounds(what, base, offset, N, buf.len()))
}

pub(crate) fn read_u8_r(
    buf: &[u8],
    offset: usize,
    base: u64,
    what: &'static str,
) -> Result<u8, DeserializationError> {
    read_u8(buf, offset).ok_or_else(|| out_of_bounds(what, base, offset, 1, buf.len()))
}

/// Read a `u16` (little-endian) at `offset`, or return `DeserializationError::OutOfBounds`.
pub(crate) fn read_u16_le_r(
    buf: &[u8],
    offset: usize,
    base: u64,
    what: &'static str,
) -> Result<u16, DeserializationError> {
    read_u16_le(buf, offset).ok_or_else(|| out_of_bounds(what, base, offset, 2, buf.len()))
}

/// Read a `u32` (little-endian) at `offset`, or return `DeserializationError::OutOfBounds`.
pub(crate) fn read_u32_le_r(
    buf: &[u8],
    offset: usize,
    base: u64,
    what: &'static str,
) -> Result<u32, DeserializationError> {
    read_u32_le(buf, offset).ok_or_else(|| out_of_bounds(what, base, offset, 4, buf.len()))
}

/// Read a `u64` (little-endian) at `offset`, or return `DeserializationError::OutOfBounds`.
pub(crate) fn read_u64_le_r(
    buf: &[u8],
    offset: usize,
    base: u64,
    what: &'static str,
) -> Result<u64, DeserializationError> {
    read_u64_le(buf, offset).ok_or_else(|| out_of_bounds(what, base, offset, 8, buf.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUF: [u8; 10] = [0x2a, 0x2a, 0x00, 0x00, 0x20, 0x00, 0x00, 0x00, 0x01, 0x02];

    #[test]
    fn test_reads_little_endian_primitives() {
        assert_eq!(read_array::<4>(&BUF, 0), Some([0x2a, 0x2a, 0x00, 0x00]));
        assert_eq!(read_u8(&BUF, 9), Some(0x02));
        assert_eq!(read_u16_le(&BUF, 8), Some(0x0201));
        assert_eq!(read_u32_le(&BUF, 4), Some(32));
        assert_eq!(read_u64_le(&BUF, 2), Some(0x0201_0000_0020_0000));
    }

    #[test]
    fn test_reads_at_the_very_end_are_rejected() {
        assert_eq!(read_u8(&BUF, 10), None);
        assert_eq!(read_u16_le(&BUF, 9), None);
        assert_eq!(read_u32_le(&BUF, 7), None);
        assert_eq!(read_u64_le(&BUF, 3), None);
        assert_eq!(read_u32_le(&BUF, usize::MAX - 1), None);
    }

    #[test]
    fn test_result_layer_reports_absolute_offset() {
        let err = read_u32_le_r(&BUF, 8, 100, "size").unwrap_err();
        match err {
            DeserializationError::OutOfBounds {
                what,
                offset,
                need,
                have,
            } => {
                assert_eq!(what, "size");
                assert_eq!(offset, 108);
                assert_eq!(need, 4);
                assert_eq!(have, 2);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_slice_r_handles_overflowing_lengths() {
        assert!(slice_r(&BUF, 2, usize::MAX, 0, "payload").is_err());
        assert_eq!(slice_r(&BUF, 10, 0, 0, "empty").unwrap(), &[] as &[u8]);
        assert_eq!(slice_r(&BUF, 8, 2, 0, "tail").unwrap(), &[0x01, 0x02]);
    }
}
