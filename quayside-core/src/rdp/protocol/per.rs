//! Minimal aligned-PER (X.691) primitives for T.125 domain PDUs and GCC

use bytes::{Buf, BufMut, Bytes};

use crate::rdp::RdpError;

fn truncated(what: &str) -> RdpError {
    RdpError::Framing {
        reason: format!("PER {what} truncated"),
    }
}

/// Reads a PER length determinant (single byte, or two bytes with the high
/// bit set on the first).
///
/// # Errors
///
/// - `RdpError::Framing` - Truncated length octets
pub fn read_length(s: &mut Bytes) -> Result<usize, RdpError> {
    if s.remaining() < 1 {
        return Err(truncated("length"));
    }

    let first = s.get_u8();
    if first & 0x80 == 0 {
        return Ok(first as usize);
    }

    if s.remaining() < 1 {
        return Err(truncated("length"));
    }
    Ok((usize::from(first & 0x7F) << 8) | usize::from(s.get_u8()))
}

/// Writes a PER length determinant (values up to 0x3FFF).
pub fn write_length(buf: &mut Vec<u8>, length: usize) {
    if length < 0x80 {
        buf.put_u8(length as u8);
    } else {
        buf.put_u8(0x80 | (length >> 8) as u8);
        buf.put_u8(length as u8);
    }
}

/// Reads the single choice octet of a domain PDU.
///
/// # Errors
///
/// - `RdpError::Framing` - Empty stream
pub fn read_choice(s: &mut Bytes) -> Result<u8, RdpError> {
    if s.remaining() < 1 {
        return Err(truncated("choice"));
    }
    Ok(s.get_u8())
}

/// Writes a choice octet.
pub fn write_choice(buf: &mut Vec<u8>, choice: u8) {
    buf.put_u8(choice);
}

/// Reads a constrained 16-bit integer offset by `min`.
///
/// # Errors
///
/// - `RdpError::Framing` - Fewer than two octets remain
pub fn read_integer16(s: &mut Bytes, min: u16) -> Result<u16, RdpError> {
    if s.remaining() < 2 {
        return Err(truncated("integer16"));
    }
    Ok(s.get_u16().wrapping_add(min))
}

/// Writes a constrained 16-bit integer offset by `min`.
pub fn write_integer16(buf: &mut Vec<u8>, value: u16, min: u16) {
    buf.put_u16(value.wrapping_sub(min));
}

/// Reads a length-prefixed unconstrained integer of up to two octets.
///
/// # Errors
///
/// - `RdpError::Framing` - Truncated stream
/// - `RdpError::Protocol` - Wider than two octets
pub fn read_integer(s: &mut Bytes) -> Result<u16, RdpError> {
    let length = read_length(s)?;
    if s.remaining() < length {
        return Err(truncated("integer"));
    }
    match length {
        0 => Ok(0),
        1 => Ok(u16::from(s.get_u8())),
        2 => Ok(s.get_u16()),
        n => Err(RdpError::Protocol {
            message: format!("PER integer with {n} octets"),
        }),
    }
}

/// Writes a length-prefixed unconstrained integer.
pub fn write_integer(buf: &mut Vec<u8>, value: u16) {
    if value < 0x100 {
        buf.put_u8(1);
        buf.put_u8(value as u8);
    } else {
        buf.put_u8(2);
        buf.put_u16(value);
    }
}

/// Writes a single-octet enumerated value.
pub fn write_enumerated(buf: &mut Vec<u8>, value: u8) {
    buf.put_u8(value);
}

/// Writes an object identifier as a length-prefixed packed arc string.
pub fn write_object(buf: &mut Vec<u8>, oid: &[u8]) {
    buf.put_u8(oid.len() as u8);
    buf.extend_from_slice(oid);
}

/// Writes the number-of-sets octet used by GCC user data lists.
pub fn write_number_of_sets(buf: &mut Vec<u8>, count: u8) {
    buf.put_u8(count);
}

/// Writes an octet string whose length is constrained to at least `min`.
pub fn write_octet_string(buf: &mut Vec<u8>, data: &[u8], min: usize) {
    write_length(buf, data.len().saturating_sub(min));
    buf.extend_from_slice(data);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_forms() {
        for length in [0usize, 0x7F, 0x80, 0x1234, 0x3FFF] {
            let mut buf = Vec::new();
            write_length(&mut buf, length);

            let mut s = Bytes::from(buf);
            assert_eq!(read_length(&mut s).unwrap(), length);
        }
    }

    #[test]
    fn test_integer16_offsets() {
        let mut buf = Vec::new();
        write_integer16(&mut buf, 1003, 1001);

        let mut s = Bytes::from(buf);
        assert_eq!(read_integer16(&mut s, 1001).unwrap(), 1003);
    }

    #[test]
    fn test_unconstrained_integer_roundtrip() {
        for value in [0u16, 1, 0xFF, 0x100, 0xFFFF] {
            let mut buf = Vec::new();
            write_integer(&mut buf, value);

            let mut s = Bytes::from(buf);
            assert_eq!(read_integer(&mut s).unwrap(), value);
        }
    }
}
