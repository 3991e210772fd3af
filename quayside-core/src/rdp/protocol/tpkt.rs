//! TPKT framing (ITU T.123) wrapping X.224 and MCS PDUs on the legacy path

use bytes::{Buf, BufMut, Bytes};

use crate::rdp::RdpError;

/// Version octet carried by every TPKT header.
pub const TPKT_VERSION: u8 = 3;

/// Fixed TPKT header size: version, reserved, big-endian length.
pub const TPKT_HEADER_LENGTH: usize = 4;

/// TPKT header utilities for the legacy RDP framing path.
pub struct TpktCodec;

impl TpktCodec {
    /// Checks whether a stream starts with a valid TPKT header.
    ///
    /// This is the framing discrimination test between the legacy path and
    /// fast-path: a fixed byte-pattern check, not a length heuristic.
    pub fn verify_header(data: &[u8]) -> bool {
        data.len() >= TPKT_HEADER_LENGTH && data[0] == TPKT_VERSION
    }

    /// Reads a TPKT header and returns the total frame length it declares.
    ///
    /// # Errors
    ///
    /// - `RdpError::Framing` - Truncated header, wrong version octet, or a
    ///   declared length shorter than the header itself
    pub fn read_header(s: &mut Bytes) -> Result<u16, RdpError> {
        if s.remaining() < TPKT_HEADER_LENGTH {
            return Err(RdpError::Framing {
                reason: "TPKT header truncated".to_string(),
            });
        }

        let version = s.get_u8();
        if version != TPKT_VERSION {
            return Err(RdpError::Framing {
                reason: format!("invalid TPKT version {version}"),
            });
        }

        s.advance(1); // reserved
        let length = s.get_u16();

        if (length as usize) < TPKT_HEADER_LENGTH {
            return Err(RdpError::Framing {
                reason: format!("TPKT length {length} shorter than header"),
            });
        }

        Ok(length)
    }

    /// Writes a TPKT header declaring `length` bytes for the whole frame.
    pub fn write_header(buf: &mut Vec<u8>, length: u16) {
        buf.put_u8(TPKT_VERSION);
        buf.put_u8(0);
        buf.put_u16(length);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_header_accepts_tpkt() {
        assert!(TpktCodec::verify_header(&[3, 0, 0, 19]));
    }

    #[test]
    fn test_verify_header_rejects_fastpath_and_short() {
        assert!(!TpktCodec::verify_header(&[0x44, 0x08, 0, 0]));
        assert!(!TpktCodec::verify_header(&[3, 0]));
    }

    #[test]
    fn test_header_write_then_read() {
        let mut buf = Vec::new();
        TpktCodec::write_header(&mut buf, 42);

        let mut s = Bytes::from(buf);
        assert_eq!(TpktCodec::read_header(&mut s).unwrap(), 42);
        assert_eq!(s.remaining(), 0);
    }

    #[test]
    fn test_read_header_rejects_undersized_length() {
        let mut s = Bytes::from_static(&[3, 0, 0, 2]);
        assert!(TpktCodec::read_header(&mut s).is_err());
    }
}
