//! ULEB128/SLEB128 codecs specialized for WASM integer widths.

use super::{cursor::Cursor, BinaryReadError, Result};

/// Decode an unsigned LEB128 as u32 (max 5 bytes).
pub fn read_uleb_u32(cur: &mut Cursor) -> Result<u32> {
    read_uleb_generic(cur, 32).map(|v| v as u32)
}

/// Decode an unsigned LEB128 as u64 (max 10 bytes).
pub fn read_uleb_u64(cur: &mut Cursor) -> Result<u64> {
    read_uleb_generic(cur, 64)
}

/// Decode a signed LEB128 as i32 (max 5 bytes).
pub fn read_sleb_i32(cur: &mut Cursor) -> Result<i32> {
    read_sleb_generic(cur, 32).map(|v| v as i32)
}

/// Decode a signed LEB128 as i64 (max 10 bytes).
pub fn read_sleb_i64(cur: &mut Cursor) -> Result<i64> {
    read_sleb_generic(cur, 64)
}

fn read_uleb_generic(cur: &mut Cursor, bits: u8) -> Result<u64> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    let max_bytes = bits.div_ceil(7);

    for _ in 0..max_bytes {
        let byte = cur.read_u8()?;
        let low = (byte & 0x7F) as u64;
        if shift >= 64 || (low << shift) >> shift != low {
            return Err(BinaryReadError::Leb128Overflow {
                target_bits: bits,
                offset: cur.offset(),
            });
        }
        result |= low << shift;

        if (byte & 0x80) == 0 {
            // Final byte. Bits beyond the target width must be zero.
            if bits < 64 && (result >> bits) != 0 {
                return Err(BinaryReadError::Leb128Overflow {
                    target_bits: bits,
                    offset: cur.offset(),
                });
            }
            return Ok(result);
        }
        shift += 7;
    }

    Err(BinaryReadError::Leb128TooManyBytes {
        limit: max_bytes,
        offset: cur.offset(),
    })
}

fn read_sleb_generic(cur: &mut Cursor, bits: u8) -> Result<i64> {
    let mut result: i64 = 0;
    let mut shift: u32 = 0;
    let size = bits as u32;
    let max_bytes = bits.div_ceil(7);

    for _ in 0..max_bytes {
        let byte = cur.read_u8()?;
        let low = (byte & 0x7F) as i64;
        if shift < 64 {
            result |= low << shift;
        }
        shift += 7;

        if (byte & 0x80) == 0 {
            // Sign extend when the terminating byte's sign bit is set and the
            // encoding did not already fill the full width.
            if (byte & 0x40) != 0 && shift < 64 {
                result |= (!0i64) << shift;
            }
            if size < 64 {
                let min = -(1i64 << (size - 1));
                let max = (1i64 << (size - 1)) - 1;
                if result < min || result > max {
                    return Err(BinaryReadError::Leb128Overflow {
                        target_bits: bits,
                        offset: cur.offset(),
                    });
                }
            } else if shift > 64 {
                // Tenth byte of an i64: only the sign bit and its extension are payload.
                let extra = byte & 0x7F;
                if extra != 0 && extra != 0x7F {
                    return Err(BinaryReadError::Leb128Overflow {
                        target_bits: bits,
                        offset: cur.offset(),
                    });
                }
            }
            return Ok(result);
        }
    }

    Err(BinaryReadError::Leb128TooManyBytes {
        limit: max_bytes,
        offset: cur.offset(),
    })
}

/// Append the unsigned LEB128 encoding of `value` to `out`.
pub fn write_uleb(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Append the signed LEB128 encoding of `value` to `out`.
pub fn write_sleb(out: &mut Vec<u8>, mut value: i64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if done {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::cursor::Cursor;
    use proptest::prelude::*;

    #[test]
    fn uleb32_basic() {
        let mut c = Cursor::new(&[0xE5, 0x8E, 0x26]); // 624485
        let v = read_uleb_u32(&mut c).unwrap();
        assert_eq!(v, 624485);
    }

    #[test]
    fn sleb32_basic() {
        // -123456 encoded as SLEB128: c0 bb 78
        let mut c = Cursor::new(&[0xC0, 0xBB, 0x78]);
        let v = read_sleb_i32(&mut c).unwrap();
        assert_eq!(v, -123456);
        let mut c = Cursor::new(&[0x7F]);
        assert_eq!(read_sleb_i32(&mut c).unwrap(), -1);
        let mut c = Cursor::new(&[0x3F]);
        assert_eq!(read_sleb_i32(&mut c).unwrap(), 63);
    }

    #[test]
    fn uleb32_overflow() {
        let bytes = [0xFFu8; 6];
        let mut c = Cursor::new(&bytes);
        let err = read_uleb_u32(&mut c).unwrap_err();
        match err {
            BinaryReadError::Leb128TooManyBytes { .. } | BinaryReadError::Leb128Overflow { .. } => {}
            e => panic!("unexpected error: {e:?}"),
        }
    }

    #[test]
    fn extreme_values() {
        for v in [i64::MIN, i64::MAX, 0, -1] {
            let mut out = Vec::new();
            write_sleb(&mut out, v);
            assert_eq!(read_sleb_i64(&mut Cursor::new(&out)).unwrap(), v);
        }
        let mut out = Vec::new();
        write_uleb(&mut out, u64::MAX);
        assert_eq!(out.len(), 10);
        assert_eq!(read_uleb_u64(&mut Cursor::new(&out)).unwrap(), u64::MAX);
    }

    #[test]
    fn truncated_encoding_is_eof() {
        let mut c = Cursor::new(&[0x80, 0x80]);
        assert!(matches!(
            read_uleb_u32(&mut c),
            Err(BinaryReadError::UnexpectedEof { offset: 2 })
        ));
    }

    proptest! {
        #[test]
        fn uleb_u32_round_trip(n in any::<u32>()) {
            let mut out = Vec::new();
            write_uleb(&mut out, n as u64);
            let mut c = Cursor::new(&out);
            prop_assert_eq!(read_uleb_u32(&mut c).unwrap(), n);
            prop_assert!(c.is_eof());
        }

        #[test]
        fn uleb_u64_round_trip(n in any::<u64>()) {
            let mut out = Vec::new();
            write_uleb(&mut out, n);
            prop_assert_eq!(read_uleb_u64(&mut Cursor::new(&out)).unwrap(), n);
        }

        #[test]
        fn sleb_i32_round_trip(n in any::<i32>()) {
            let mut out = Vec::new();
            write_sleb(&mut out, n as i64);
            let mut c = Cursor::new(&out);
            prop_assert_eq!(read_sleb_i32(&mut c).unwrap(), n);
            prop_assert!(c.is_eof());
        }

        #[test]
        fn sleb_i64_round_trip(n in any::<i64>()) {
            let mut out = Vec::new();
            write_sleb(&mut out, n);
            prop_assert_eq!(read_sleb_i64(&mut Cursor::new(&out)).unwrap(), n);
        }
    }
}
