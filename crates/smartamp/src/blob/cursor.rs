//! Bounds-checked little-endian reader over a byte slice.
//!
//! Every read either returns the requested value and advances, or fails with
//! [`ParseError::Truncated`] without moving. Offsets in errors are relative to
//! `base`, so nested cursors still report positions inside the payload.

use alloc::string::String;

use crate::error::ParseError;

/// Length of a section tag.
pub const TAG_LEN: usize = 5;

/// Length of a fixed NUL-padded name field.
pub const NAME_LEN: usize = 64;

/// Advancing reader; see the module docs.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> ByteCursor<'a> {
    /// Cursor at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_base(data, 0)
    }

    /// Cursor whose error offsets are shifted by `base`.
    #[must_use]
    pub fn with_base(data: &'a [u8], base: usize) -> Self {
        Self { data, pos: 0, base }
    }

    /// Position relative to the start of `data`.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Absolute offset (`base + position`).
    #[must_use]
    pub fn offset(&self) -> usize {
        self.base.saturating_add(self.pos)
    }

    /// Bytes left.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// `true` when every byte has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Take the next `n` bytes.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        let end = self.pos.checked_add(n).ok_or_else(|| self.truncated(n))?;
        let out = self.data.get(self.pos..end).ok_or_else(|| self.truncated(n))?;
        self.pos = end;
        Ok(out)
    }

    /// Take everything that is left.
    pub fn rest(&mut self) -> &'a [u8] {
        let out = self.data.get(self.pos..).unwrap_or_default();
        self.pos = self.data.len();
        out
    }

    /// Skip `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<(), ParseError> {
        self.bytes(n).map(|_| ())
    }

    /// Next byte without consuming it.
    #[must_use]
    pub fn peek_u8(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Read `N` bytes into an array.
    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], ParseError> {
        let raw = self.bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(raw);
        Ok(out)
    }

    /// Read one byte.
    pub fn u8(&mut self) -> Result<u8, ParseError> {
        self.array::<1>().map(|[b]| b)
    }

    /// Read a little-endian `u16`.
    pub fn u16_le(&mut self) -> Result<u16, ParseError> {
        self.array().map(u16::from_le_bytes)
    }

    /// Read a little-endian `u32`.
    pub fn u32_le(&mut self) -> Result<u32, ParseError> {
        self.array().map(u32::from_le_bytes)
    }

    /// Read a little-endian `i32`.
    pub fn i32_le(&mut self) -> Result<i32, ParseError> {
        self.array().map(i32::from_le_bytes)
    }

    /// Read a `u32` count and convert it to `usize`.
    ///
    /// Every record is at least one byte long, so a count larger than the
    /// bytes left is reported as truncation before anything is allocated.
    pub fn count(&mut self) -> Result<usize, ParseError> {
        let at = self.pos;
        let n = usize::try_from(self.u32_le()?).unwrap_or(usize::MAX);
        if n > self.remaining() {
            self.pos = at;
            return Err(ParseError::Truncated {
                offset: self.offset(),
                needed: n,
                available: self.remaining(),
            });
        }
        Ok(n)
    }

    /// Read a 5-byte section tag.
    pub fn tag(&mut self) -> Result<[u8; TAG_LEN], ParseError> {
        self.array()
    }

    /// Read a 64-byte NUL-padded UTF-8 name.
    pub fn name64(&mut self) -> Result<String, ParseError> {
        let raw: [u8; NAME_LEN] = self.array()?;
        decode_name(&raw)
    }

    /// Read a `u32` length followed by that many bytes.
    pub fn length_prefixed(&mut self) -> Result<&'a [u8], ParseError> {
        let at = self.pos;
        let len = usize::try_from(self.u32_le()?).unwrap_or(usize::MAX);
        let out = self.bytes(len);
        if out.is_err() {
            self.pos = at;
        }
        out
    }

    fn truncated(&self, needed: usize) -> ParseError {
        ParseError::Truncated {
            offset: self.offset(),
            needed,
            available: self.remaining(),
        }
    }
}

/// Decode a NUL-padded UTF-8 name field.
pub fn decode_name(raw: &[u8]) -> Result<String, ParseError> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let used = raw.get(..end).unwrap_or_default();
    core::str::from_utf8(used)
        .map(String::from)
        .map_err(|_| ParseError::BadName)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_values() {
        let data = [0x01, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12, 0xFF, 0xFF, 0xFF, 0xFF];
        let mut c = ByteCursor::new(&data);
        assert_eq!(c.u8().unwrap(), 0x01);
        assert_eq!(c.u16_le().unwrap(), 0x1234);
        assert_eq!(c.u32_le().unwrap(), 0x1234_5678);
        assert_eq!(c.i32_le().unwrap(), -1);
        assert!(c.is_empty());
    }

    #[test]
    fn truncated_read_does_not_advance() {
        let data = [0xAA, 0xBB];
        let mut c = ByteCursor::with_base(&data, 100);
        c.u8().unwrap();
        let err = c.u32_le().unwrap_err();
        assert_eq!(
            err,
            ParseError::Truncated {
                offset: 101,
                needed: 4,
                available: 1
            }
        );
        assert_eq!(c.position(), 1);
    }

    #[test]
    fn oversized_count_is_truncation() {
        let mut c = ByteCursor::new(&[0xFF, 0xFF, 0xFF, 0x7F, 0x00]);
        assert!(matches!(c.count(), Err(ParseError::Truncated { .. })));
        assert_eq!(c.position(), 0);
    }

    #[test]
    fn name_stops_at_nul() {
        let mut raw = [0u8; NAME_LEN];
        raw[..5].copy_from_slice(b"music");
        let mut c = ByteCursor::new(&raw);
        assert_eq!(c.name64().unwrap(), "music");
    }

    #[test]
    fn invalid_utf8_name_rejected() {
        let mut raw = [0u8; NAME_LEN];
        raw[0] = 0xFF;
        assert_eq!(decode_name(&raw), Err(ParseError::BadName));
    }
}
