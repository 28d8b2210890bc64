//! Variable-length integer primitives shared by every section of the
//! block format.
//!
//! Unsigned values use 7 data bits per byte with the high bit as a
//! continuation flag, little-endian byte order. Signed deltas are
//! zig-zag folded into the unsigned domain before encoding, so small
//! magnitudes stay small on the wire.

use bytes::{Buf, Bytes};

use crate::error::{StrataError, StrataResult};

pub fn write_unsigned(buf: &mut Vec<u8>, value: u64) {
    leb128::write::unsigned(buf, value).unwrap();
}

pub fn write_signed(buf: &mut Vec<u8>, value: i64) {
    leb128::write::unsigned(buf, fold_zigzag(value)).unwrap();
}

pub fn read_unsigned(bytes: &mut &[u8]) -> StrataResult<u64> {
    leb128::read::unsigned(bytes).map_err(|_| StrataError::decode("Invalid varint"))
}

pub fn read_signed(bytes: &mut &[u8]) -> StrataResult<i64> {
    read_unsigned(bytes).map(unfold_zigzag)
}

/// Reads an unsigned VLQ from a [`Bytes`] cursor, advancing it past the
/// consumed bytes.
pub fn read_unsigned_from(cursor: &mut Bytes) -> StrataResult<u64> {
    let mut slice: &[u8] = cursor;
    let before = slice.len();
    let value = read_unsigned(&mut slice)?;
    let used = before - slice.len();
    cursor.advance(used);
    Ok(value)
}

pub fn read_signed_from(cursor: &mut Bytes) -> StrataResult<i64> {
    read_unsigned_from(cursor).map(unfold_zigzag)
}

pub fn fold_zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub fn unfold_zigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn zigzag_round_trip() {
        for v in [0i64, 1, -1, 63, -64, i64::MAX, i64::MIN, 12345, -98765] {
            assert_eq!(unfold_zigzag(fold_zigzag(v)), v);
        }
        // small magnitudes map to small unsigned values
        assert_eq!(fold_zigzag(0), 0);
        assert_eq!(fold_zigzag(-1), 1);
        assert_eq!(fold_zigzag(1), 2);
        assert_eq!(fold_zigzag(-2), 3);
    }

    #[test]
    fn unsigned_round_trip() {
        let mut buf = Vec::new();
        let values = [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX];
        for v in values {
            write_unsigned(&mut buf, v);
        }
        let mut rest: &[u8] = &buf;
        for v in values {
            assert_eq!(read_unsigned(&mut rest).unwrap(), v);
        }
        assert!(rest.is_empty());
    }

    #[test]
    fn signed_round_trip() {
        let mut buf = Vec::new();
        let values = [0i64, -1, 1, i32::MIN as i64, i32::MAX as i64];
        for v in values {
            write_signed(&mut buf, v);
        }
        let mut rest: &[u8] = &buf;
        for v in values {
            assert_eq!(read_signed(&mut rest).unwrap(), v);
        }
    }

    #[test]
    fn truncated_input_fails() {
        let mut buf = Vec::new();
        write_unsigned(&mut buf, u64::MAX);
        let mut rest = &buf[..buf.len() - 1];
        assert!(read_unsigned(&mut rest).is_err());
    }

    #[test]
    fn cursor_read_advances() {
        let mut buf = Vec::new();
        write_unsigned(&mut buf, 300);
        write_unsigned(&mut buf, 7);
        let mut cursor = Bytes::from(buf);
        assert_eq!(read_unsigned_from(&mut cursor).unwrap(), 300);
        assert_eq!(read_unsigned_from(&mut cursor).unwrap(), 7);
        assert!(cursor.is_empty());
    }
}
