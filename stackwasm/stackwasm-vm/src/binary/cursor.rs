//! Byte cursor with offset tracking, random access and little-endian primitives.

use super::BinaryReadError;

/// Cursor over a byte slice with absolute offset tracking.
#[derive(Debug, Clone, Copy)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// Create a new cursor over the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current absolute byte offset within the underlying slice.
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// Remaining unread length.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Total length of the underlying slice.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True if at end of input.
    pub fn is_eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Move the cursor by a relative amount. Landing exactly on the end is allowed.
    pub fn seek(&mut self, delta: isize) -> super::Result<()> {
        let target = self
            .pos
            .checked_add_signed(delta)
            .ok_or(BinaryReadError::Malformed {
                offset: self.pos,
                msg: "seek before start of stream",
            })?;
        self.set_offset(target)
    }

    /// Jump to an absolute offset.
    pub fn set_offset(&mut self, offset: usize) -> super::Result<()> {
        if offset > self.data.len() {
            return Err(BinaryReadError::UnexpectedEof { offset });
        }
        self.pos = offset;
        Ok(())
    }

    /// Peek next byte without advancing.
    pub fn peek_u8(&self) -> super::Result<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(BinaryReadError::UnexpectedEof { offset: self.pos })
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> super::Result<u8> {
        let b = self.peek_u8()?;
        self.pos += 1;
        Ok(b)
    }

    /// Read exactly n bytes and return a slice view into the underlying data.
    pub fn read_bytes(&mut self, n: usize) -> super::Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(BinaryReadError::Malformed {
            offset: self.pos,
            msg: "position overflow",
        })?;
        if end > self.data.len() {
            return Err(BinaryReadError::UnexpectedEof { offset: self.pos });
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Read exactly N bytes into an array.
    pub fn read_array<const N: usize>(&mut self) -> super::Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Skip exactly n bytes.
    pub fn skip(&mut self, n: usize) -> super::Result<()> {
        let _ = self.read_bytes(n)?;
        Ok(())
    }

    /// Read `n` bytes as an ASCII string. Non-ASCII input is rejected.
    pub fn read_ascii_string(&mut self, n: usize) -> super::Result<String> {
        let start = self.pos;
        let bytes = self.read_bytes(n)?;
        if !bytes.is_ascii() {
            return Err(BinaryReadError::InvalidUtf8 { offset: start });
        }
        Ok(bytes.iter().map(|&b| b as char).collect())
    }

    /// Read little-endian u32.
    pub fn read_u32_le(&mut self) -> super::Result<u32> {
        self.read_array().map(u32::from_le_bytes)
    }

    /// Read little-endian u64.
    pub fn read_u64_le(&mut self) -> super::Result<u64> {
        self.read_array().map(u64::from_le_bytes)
    }

    /// Read an IEEE-754 single in little-endian byte order.
    pub fn read_f32(&mut self) -> super::Result<f32> {
        self.read_u32_le().map(f32::from_bits)
    }

    /// Read an IEEE-754 double in little-endian byte order.
    pub fn read_f64(&mut self) -> super::Result<f64> {
        self.read_u64_le().map(f64::from_bits)
    }

    /// Return a subslice starting at current position with given length (no advance).
    pub fn slice(&self, n: usize) -> super::Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(BinaryReadError::Malformed {
            offset: self.pos,
            msg: "position overflow",
        })?;
        self.data
            .get(self.pos..end)
            .ok_or(BinaryReadError::UnexpectedEof { offset: self.pos })
    }
}
