use crate::err::{DeserializationError, DeserializationResult};
use crate::utils::bytes;
use crate::utils::decode_utf16le_bytes_z;

/// A lightweight cursor over an immutable byte slice.
///
/// This is the slice/offset equivalent of `Cursor<&[u8]>`, intended for parsing where:
/// - the data is already in memory, and
/// - we want explicit bounds/offset control without IO-style error plumbing.
///
/// `base` is the absolute offset of `buf[0]` (usually within the chunk); every error reports
/// `base + pos`. The cursor is `Copy`, so a speculative read can be done on a copy and committed
/// by assigning it back.
///
/// All reads are little-endian and advance the cursor on success only.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
    base: u64,
}

impl<'a> ByteCursor<'a> {
    #[inline]
    pub(crate) fn new(buf: &'a [u8], base: u64) -> Self {
        ByteCursor { buf, pos: 0, base }
    }

    #[inline]
    pub(crate) fn with_pos(buf: &'a [u8], pos: usize, base: u64) -> DeserializationResult<Self> {
        // Allow pos == len (EOF), reject pos > len.
        let _ = bytes::slice_r(buf, pos, 0, base, "cursor.position")?;
        Ok(ByteCursor { buf, pos, base })
    }

    /// Absolute offset of the cursor position.
    #[inline]
    pub(crate) fn position(&self) -> u64 {
        self.base.saturating_add(self.pos as u64)
    }

    #[inline]
    pub(crate) fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    #[inline]
    pub(crate) fn is_eof(&self) -> bool {
        self.pos >= self.buf.len()
    }

    #[inline]
    pub(crate) fn advance(&mut self, n: usize, what: &'static str) -> DeserializationResult<()> {
        let _ = self.take_bytes(n, what)?;
        Ok(())
    }

    #[inline]
    pub(crate) fn take_bytes(
        &mut self,
        len: usize,
        what: &'static str,
    ) -> DeserializationResult<&'a [u8]> {
        let out = bytes::slice_r(self.buf, self.pos, len, self.base, what)?;
        self.pos += len;
        Ok(out)
    }

    #[inline]
    pub(crate) fn array<const N: usize>(
        &mut self,
        what: &'static str,
    ) -> DeserializationResult<[u8; N]> {
        let v = bytes::read_array_r::<N>(self.buf, self.pos, self.base, what)?;
        self.pos += N;
        Ok(v)
    }

    #[inline]
    pub(crate) fn peek_u8(&self, what: &'static str) -> DeserializationResult<u8> {
        bytes::read_u8_r(self.buf, self.pos, self.base, what)
    }

    #[inline]
    pub(crate) fn u8_named(&mut self, what: &'static str) -> DeserializationResult<u8> {
        let v = self.peek_u8(what)?;
        self.pos += 1;
        Ok(v)
    }

    #[inline]
    pub(crate) fn u16_named(&mut self, what: &'static str) -> DeserializationResult<u16> {
        let v = bytes::read_u16_le_r(self.buf, self.pos, self.base, what)?;
        self.pos += 2;
        Ok(v)
    }

    #[inline]
    pub(crate) fn u32_named(&mut self, what: &'static str) -> DeserializationResult<u32> {
        let v = bytes::read_u32_le_r(self.buf, self.pos, self.base, what)?;
        self.pos += 4;
        Ok(v)
    }

    #[inline]
    pub(crate) fn u64_named(&mut self, what: &'static str) -> DeserializationResult<u64> {
        let v = bytes::read_u64_le_r(self.buf, self.pos, self.base, what)?;
        self.pos += 8;
        Ok(v)
    }

    /// Read `char_count` UTF-16 code units (little-endian) and decode them, stopping at NUL if
    /// present.
    pub(crate) fn utf16_by_char_count(
        &mut self,
        char_count: usize,
        what: &'static str,
    ) -> DeserializationResult<String> {
        let start = self.position();
        let byte_len = char_count
            .checked_mul(2)
            .ok_or_else(|| bytes::out_of_bounds(what, self.base, self.pos, usize::MAX, self.buf.len()))?;

        let raw = self.take_bytes(byte_len, what)?;
        decode_utf16le_bytes_z(raw)
            .map_err(|_| DeserializationError::InvalidUtf16 { what, offset: start })
    }

    /// Read a `u16` length prefix (number of UTF-16 code units), then that many code units.
    /// Optionally reads and discards a trailing NUL code unit.
    pub(crate) fn len_prefixed_utf16_string(
        &mut self,
        is_null_terminated: bool,
        what: &'static str,
    ) -> DeserializationResult<String> {
        let char_count = usize::from(self.u16_named(what)?);
        let s = self.utf16_by_char_count(char_count, what)?;
        if is_null_terminated {
            let _ = self.u16_named(what)?;
        }
        Ok(s)
    }
}
