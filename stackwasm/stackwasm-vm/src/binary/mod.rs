//! Binary layer for the WASM container: byte cursor, owned byte stream with
//! its write side, LEB128 codecs, and length-prefixed helpers.
//! Errors here carry the byte offset; `crate::error::Error` turns them into
//! `MalformedModule` failures.

pub mod cursor;
pub mod leb128;
pub mod reader;
pub mod sections;
pub mod stream;

pub use cursor::Cursor;
pub use stream::ByteStream;

use thiserror::Error;

/// Result alias for binary reading operations.
pub type Result<T> = core::result::Result<T, BinaryReadError>;

/// Errors that can occur while reading a WASM binary stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BinaryReadError {
    #[error("unexpected end of stream at offset {offset}")]
    UnexpectedEof { offset: usize },

    #[error("LEB128 overflow (target bits={target_bits}) at offset {offset}")]
    Leb128Overflow { target_bits: u8, offset: usize },

    #[error("too many bytes in LEB128 (limit={limit}) at offset {offset}")]
    Leb128TooManyBytes { limit: u8, offset: usize },

    #[error("invalid UTF-8 string at offset {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("malformed binary at offset {offset}: {msg}")]
    Malformed { offset: usize, msg: &'static str },
}

impl BinaryReadError {
    /// Byte offset the failure was detected at.
    pub fn offset(&self) -> usize {
        match *self {
            BinaryReadError::UnexpectedEof { offset }
            | BinaryReadError::Leb128Overflow { offset, .. }
            | BinaryReadError::Leb128TooManyBytes { offset, .. }
            | BinaryReadError::InvalidUtf8 { offset }
            | BinaryReadError::Malformed { offset, .. } => offset,
        }
    }

    /// Same failure, shifted by `base` (sub-cursors report payload-relative offsets).
    pub fn rebase(self, base: usize) -> Self {
        match self {
            BinaryReadError::UnexpectedEof { offset } => {
                BinaryReadError::UnexpectedEof { offset: offset + base }
            }
            BinaryReadError::Leb128Overflow { target_bits, offset } => {
                BinaryReadError::Leb128Overflow { target_bits, offset: offset + base }
            }
            BinaryReadError::Leb128TooManyBytes { limit, offset } => {
                BinaryReadError::Leb128TooManyBytes { limit, offset: offset + base }
            }
            BinaryReadError::InvalidUtf8 { offset } => {
                BinaryReadError::InvalidUtf8 { offset: offset + base }
            }
            BinaryReadError::Malformed { offset, msg } => {
                BinaryReadError::Malformed { offset: offset + base, msg }
            }
        }
    }
}
