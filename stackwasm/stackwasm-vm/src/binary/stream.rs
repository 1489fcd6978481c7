//! Owned byte buffer: loads a module from disk or memory and carries the
//! write side used by encoders (LEB128 emission and length fix-ups).

use std::path::Path;

use super::{cursor::Cursor, leb128, BinaryReadError};

/// Owned, growable byte buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteStream {
    buf: Vec<u8>,
}

impl ByteStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of an existing buffer.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self { buf: bytes.into() }
    }

    /// Read a whole file into a new stream.
    pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        std::fs::read(path).map(Self::from_bytes)
    }

    /// Reader positioned at offset 0.
    pub fn cursor(&self) -> Cursor<'_> {
        Cursor::new(&self.buf)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_byte(&mut self, byte: u8) {
        self.buf.push(byte);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Unsigned LEB128.
    pub fn write_u32(&mut self, value: u32) {
        leb128::write_uleb(&mut self.buf, value as u64);
    }

    /// Unsigned LEB128.
    pub fn write_u64(&mut self, value: u64) {
        leb128::write_uleb(&mut self.buf, value);
    }

    /// Signed LEB128, as used by `i32.const` immediates.
    pub fn write_i32(&mut self, value: i32) {
        leb128::write_sleb(&mut self.buf, value as i64);
    }

    /// Signed LEB128, as used by `i64.const` immediates.
    pub fn write_i64(&mut self, value: i64) {
        leb128::write_sleb(&mut self.buf, value);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.write_bytes(&value.to_le_bytes());
    }

    /// Length-prefixed name.
    pub fn write_name(&mut self, name: &str) {
        self.write_u32(name.len() as u32);
        self.write_bytes(name.as_bytes());
    }

    /// Append a placeholder byte and return its index for a later `fix_up_byte`.
    pub fn reserve_byte(&mut self) -> usize {
        self.buf.push(0);
        self.buf.len() - 1
    }

    /// Patch a previously written byte, typically a section length once known.
    pub fn fix_up_byte(&mut self, index: usize, value: u8) -> super::Result<()> {
        let len = self.buf.len();
        let slot = self
            .buf
            .get_mut(index)
            .ok_or(BinaryReadError::UnexpectedEof { offset: len })?;
        *slot = value;
        Ok(())
    }
}

impl From<Vec<u8>> for ByteStream {
    fn from(buf: Vec<u8>) -> Self {
        Self { buf }
    }
}

impl AsRef<[u8]> for ByteStream {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::leb128::{read_sleb_i32, read_uleb_u32};

    #[test]
    fn write_then_read_back() {
        let mut s = ByteStream::new();
        s.write_byte(0x41);
        s.write_i32(-7);
        s.write_u32(300);
        s.write_f64(0.5);
        let mut c = s.cursor();
        assert_eq!(c.read_u8().unwrap(), 0x41);
        assert_eq!(read_sleb_i32(&mut c).unwrap(), -7);
        assert_eq!(read_uleb_u32(&mut c).unwrap(), 300);
        assert_eq!(c.read_f64().unwrap(), 0.5);
        assert!(c.is_eof());
    }

    #[test]
    fn fix_up_reserved_length() {
        let mut s = ByteStream::new();
        s.write_byte(0x01);
        let len_at = s.reserve_byte();
        s.write_bytes(&[0xAA, 0xBB, 0xCC]);
        let payload = (s.len() - len_at - 1) as u8;
        s.fix_up_byte(len_at, payload).unwrap();
        assert_eq!(s.as_bytes(), &[0x01, 0x03, 0xAA, 0xBB, 0xCC]);
        assert!(s.fix_up_byte(99, 0).is_err());
    }
}
