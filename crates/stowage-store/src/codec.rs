//! Big-endian primitives for the on-disk and wire formats
//!
//! Writers go through [`bytes::BufMut`]; readers pull from any
//! [`std::io::Read`] since descriptors arrive on streams of unknown length.

use std::io::{ErrorKind, Read};
use stowage_common::{Error, Result};

fn read_array<const N: usize>(reader: &mut dyn Read, field: &str) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            Error::deserialization(format!("stream ended while reading {field}"))
        } else {
            Error::Io(e)
        }
    })?;
    Ok(buf)
}

pub(crate) fn read_i8(reader: &mut dyn Read, field: &str) -> Result<i8> {
    read_array::<1>(reader, field).map(i8::from_be_bytes)
}

pub(crate) fn read_i16(reader: &mut dyn Read, field: &str) -> Result<i16> {
    read_array::<2>(reader, field).map(i16::from_be_bytes)
}

pub(crate) fn read_i32(reader: &mut dyn Read, field: &str) -> Result<i32> {
    read_array::<4>(reader, field).map(i32::from_be_bytes)
}

pub(crate) fn read_i64(reader: &mut dyn Read, field: &str) -> Result<i64> {
    read_array::<8>(reader, field).map(i64::from_be_bytes)
}

/// Read eight bytes as an unsigned value, no sign check
pub(crate) fn read_u64_bits(reader: &mut dyn Read, field: &str) -> Result<u64> {
    read_array::<8>(reader, field).map(u64::from_be_bytes)
}

/// Read an `i8` boolean (0 = false, 1 = true)
pub(crate) fn read_bool(reader: &mut dyn Read, field: &str) -> Result<bool> {
    match read_i8(reader, field)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(Error::deserialization(format!(
            "invalid boolean {other} for {field}"
        ))),
    }
}

/// Read a non-negative `i64` as `u64`
pub(crate) fn read_u64(reader: &mut dyn Read, field: &str) -> Result<u64> {
    let value = read_i64(reader, field)?;
    u64::try_from(value)
        .map_err(|_| Error::deserialization(format!("negative {field}: {value}")))
}

pub(crate) fn read_exact_vec(reader: &mut dyn Read, len: usize, field: &str) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            Error::deserialization(format!("stream ended while reading {field}"))
        } else {
            Error::Io(e)
        }
    })?;
    Ok(buf)
}

/// Convert a position or size to its signed wire form
pub(crate) fn to_wire_i64(value: u64, field: &str) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| Error::invalid_argument(format!("{field} {value} does not fit in an i64")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_truncated_stream() {
        let mut cursor = Cursor::new(vec![0u8, 1, 2]);
        let err = read_i64(&mut cursor, "size").unwrap_err();
        assert!(matches!(err, Error::Deserialization(_)));
    }

    #[test]
    fn test_negative_unsigned() {
        let mut cursor = Cursor::new((-5i64).to_be_bytes().to_vec());
        assert!(matches!(
            read_u64(&mut cursor, "size"),
            Err(Error::Deserialization(_))
        ));
    }

    #[test]
    fn test_bool_values() {
        let mut cursor = Cursor::new(vec![1u8, 0, 7]);
        assert!(read_bool(&mut cursor, "flag").unwrap());
        assert!(!read_bool(&mut cursor, "flag").unwrap());
        assert!(read_bool(&mut cursor, "flag").is_err());
    }
}
