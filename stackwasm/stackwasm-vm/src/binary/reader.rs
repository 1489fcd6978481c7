//! Counted sequences: byte strings, names and element vectors, each prefixed
//! by an unsigned LEB128 count.

use super::{cursor::Cursor, leb128, BinaryReadError, Result};

/// Element count of a vector. Each element occupies at least one byte, so a
/// count larger than what is left is rejected before anything is allocated.
fn read_count(cur: &mut Cursor) -> Result<usize> {
    let at = cur.offset();
    let count = leb128::read_uleb_u32(cur)? as usize;
    if count > cur.remaining() {
        return Err(BinaryReadError::UnexpectedEof { offset: at });
    }
    Ok(count)
}

/// Borrow a counted byte string.
pub fn read_len_prefixed_bytes<'a>(cur: &mut Cursor<'a>) -> Result<&'a [u8]> {
    let len = leb128::read_uleb_u32(cur)? as usize;
    cur.read_bytes(len)
}

/// Import, export and custom-section names.
pub fn read_name(cur: &mut Cursor) -> Result<String> {
    let at = cur.offset();
    let bytes = read_len_prefixed_bytes(cur)?;
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| BinaryReadError::InvalidUtf8 { offset: at })
}

/// Counted vector whose elements are decoded by `elem`.
pub fn read_vec<'a, T, F>(cur: &mut Cursor<'a>, mut elem: F) -> Result<Vec<T>>
where
    F: FnMut(&mut Cursor<'a>) -> Result<T>,
{
    let count = read_count(cur)?;
    (0..count).map(|_| elem(cur)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_utf8() {
        let mut c = Cursor::new(&[0x04, b'm', 0xC3, 0xA9, b'm']);
        assert_eq!(read_name(&mut c).unwrap(), "mém");
        assert!(c.is_eof());

        let mut c = Cursor::new(&[0x01, 0xFF]);
        assert!(matches!(read_name(&mut c), Err(BinaryReadError::InvalidUtf8 { offset: 0 })));
    }

    #[test]
    fn vectors_decode_each_element() {
        let mut c = Cursor::new(&[0x02, 0x7F, 0x7E, 0x00]);
        let v = read_vec(&mut c, |c| c.read_u8()).unwrap();
        assert_eq!(v, vec![0x7F, 0x7E]);
        assert_eq!(c.remaining(), 1);
    }

    #[test]
    fn oversized_counts_fail_early() {
        let mut c = Cursor::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0x0F, 0x00]);
        assert!(matches!(
            read_vec(&mut c, |c| c.read_u8()),
            Err(BinaryReadError::UnexpectedEof { offset: 0 })
        ));
        let mut c = Cursor::new(&[0x05, b'a']);
        assert!(matches!(read_name(&mut c), Err(BinaryReadError::UnexpectedEof { .. })));
    }
}
