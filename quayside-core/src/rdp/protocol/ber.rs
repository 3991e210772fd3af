//! Minimal BER (X.690) primitives for the T.125 connect phase

use bytes::{Buf, BufMut, Bytes};

use crate::rdp::RdpError;

pub const TAG_BOOLEAN: u8 = 0x01;
pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_ENUMERATED: u8 = 0x0A;
/// SEQUENCE with the constructed bit set.
pub const TAG_SEQUENCE: u8 = 0x30;

fn truncated(what: &str) -> RdpError {
    RdpError::Framing {
        reason: format!("BER {what} truncated"),
    }
}

/// Reads a definite BER length (short form or 1/2-byte long form).
///
/// # Errors
///
/// - `RdpError::Framing` - Truncated length octets
/// - `RdpError::Protocol` - Long form wider than two bytes
pub fn read_length(s: &mut Bytes) -> Result<usize, RdpError> {
    if s.remaining() < 1 {
        return Err(truncated("length"));
    }

    let first = s.get_u8();
    if first & 0x80 == 0 {
        return Ok(first as usize);
    }

    match first & 0x7F {
        1 => {
            if s.remaining() < 1 {
                return Err(truncated("length"));
            }
            Ok(s.get_u8() as usize)
        }
        2 => {
            if s.remaining() < 2 {
                return Err(truncated("length"));
            }
            Ok(s.get_u16() as usize)
        }
        n => Err(RdpError::Protocol {
            message: format!("unsupported BER length form ({n} octets)"),
        }),
    }
}

/// Writes a definite BER length in the shortest form.
pub fn write_length(buf: &mut Vec<u8>, length: usize) {
    if length < 0x80 {
        buf.put_u8(length as u8);
    } else if length < 0x100 {
        buf.put_u8(0x81);
        buf.put_u8(length as u8);
    } else {
        buf.put_u8(0x82);
        buf.put_u16(length as u16);
    }
}

/// Reads an exact universal tag octet and returns the content length.
///
/// # Errors
///
/// - `RdpError::Framing` - Truncated stream
/// - `RdpError::Protocol` - Tag mismatch
pub fn read_tag(s: &mut Bytes, tag: u8) -> Result<usize, RdpError> {
    if s.remaining() < 1 {
        return Err(truncated("tag"));
    }

    let got = s.get_u8();
    if got != tag {
        return Err(RdpError::Protocol {
            message: format!("expected BER tag {tag:#04x}, got {got:#04x}"),
        });
    }

    read_length(s)
}

/// Reads a high-number application tag (`[APPLICATION n]`, constructed) and
/// returns the content length.
///
/// # Errors
///
/// - `RdpError::Framing` - Truncated stream
/// - `RdpError::Protocol` - Tag mismatch
pub fn read_application_tag(s: &mut Bytes, tag: u8) -> Result<usize, RdpError> {
    if s.remaining() < 2 {
        return Err(truncated("application tag"));
    }

    let class = s.get_u8();
    let number = s.get_u8();
    if class != 0x7F || number != tag {
        return Err(RdpError::Protocol {
            message: format!("expected application tag {tag}, got {class:#04x} {number:#04x}"),
        });
    }

    read_length(s)
}

/// Writes a high-number application tag header.
pub fn write_application_tag(buf: &mut Vec<u8>, tag: u8, length: usize) {
    buf.put_u8(0x7F);
    buf.put_u8(tag);
    write_length(buf, length);
}

/// Reads an INTEGER of up to four content octets.
///
/// # Errors
///
/// - `RdpError::Framing` - Truncated stream
/// - `RdpError::Protocol` - Tag mismatch or oversized value
pub fn read_integer(s: &mut Bytes) -> Result<u32, RdpError> {
    let length = read_tag(s, TAG_INTEGER)?;
    if length == 0 || length > 4 || s.remaining() < length {
        return Err(RdpError::Protocol {
            message: format!("BER integer with {length} content octets"),
        });
    }

    let mut value = 0u32;
    for _ in 0..length {
        value = (value << 8) | u32::from(s.get_u8());
    }
    Ok(value)
}

/// Writes an INTEGER in the fewest content octets.
pub fn write_integer(buf: &mut Vec<u8>, value: u32) {
    buf.put_u8(TAG_INTEGER);
    if value < 0x80 {
        buf.put_u8(1);
        buf.put_u8(value as u8);
    } else if value < 0x8000 {
        buf.put_u8(2);
        buf.put_u16(value as u16);
    } else {
        buf.put_u8(4);
        buf.put_u32(value);
    }
}

/// Reads a BOOLEAN.
///
/// # Errors
///
/// - `RdpError::Framing` / `RdpError::Protocol` - Truncation or tag mismatch
pub fn read_boolean(s: &mut Bytes) -> Result<bool, RdpError> {
    let length = read_tag(s, TAG_BOOLEAN)?;
    if length != 1 || s.remaining() < 1 {
        return Err(RdpError::Protocol {
            message: "malformed BER boolean".to_string(),
        });
    }
    Ok(s.get_u8() != 0)
}

/// Reads an OCTET STRING and returns its contents.
///
/// # Errors
///
/// - `RdpError::Framing` / `RdpError::Protocol` - Truncation or tag mismatch
pub fn read_octet_string(s: &mut Bytes) -> Result<Bytes, RdpError> {
    let length = read_tag(s, TAG_OCTET_STRING)?;
    if s.remaining() < length {
        return Err(truncated("octet string"));
    }
    Ok(s.split_to(length))
}

/// Writes an OCTET STRING.
pub fn write_octet_string(buf: &mut Vec<u8>, data: &[u8]) {
    buf.put_u8(TAG_OCTET_STRING);
    write_length(buf, data.len());
    buf.extend_from_slice(data);
}

/// Writes an ENUMERATED with a single content octet.
pub fn write_enumerated(buf: &mut Vec<u8>, value: u8) {
    buf.put_u8(TAG_ENUMERATED);
    buf.put_u8(1);
    buf.put_u8(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_forms() {
        for length in [0usize, 0x7F, 0x80, 0xFF, 0x100, 0xFFFF] {
            let mut buf = Vec::new();
            write_length(&mut buf, length);

            let mut s = Bytes::from(buf);
            assert_eq!(read_length(&mut s).unwrap(), length);
        }
    }

    #[test]
    fn test_integer_roundtrip() {
        for value in [0u32, 1, 0x7F, 0x80, 0x7FFF, 0xFFF8, 0x0001_0000] {
            let mut buf = Vec::new();
            write_integer(&mut buf, value);

            let mut s = Bytes::from(buf);
            assert_eq!(read_integer(&mut s).unwrap(), value);
        }
    }

    #[test]
    fn test_octet_string_roundtrip() {
        let mut buf = Vec::new();
        write_octet_string(&mut buf, b"quay");

        let mut s = Bytes::from(buf);
        assert_eq!(read_octet_string(&mut s).unwrap().as_ref(), b"quay");
    }

    #[test]
    fn test_application_tag_roundtrip() {
        let mut buf = Vec::new();
        write_application_tag(&mut buf, 101, 0x1234);

        let mut s = Bytes::from(buf);
        assert_eq!(read_application_tag(&mut s, 101).unwrap(), 0x1234);
    }

    #[test]
    fn test_tag_mismatch_rejected() {
        let mut s = Bytes::from_static(&[TAG_INTEGER, 1, 5]);
        assert!(read_tag(&mut s, TAG_BOOLEAN).is_err());
    }
}
