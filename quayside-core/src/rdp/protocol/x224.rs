//! X.224 class-0 TPDUs: connection request/confirm and the data header

use bytes::{Buf, BufMut, Bytes};

use super::tpkt::TpktCodec;
use crate::rdp::RdpError;

/// Connection Request TPDU code (high nibble).
pub const TPDU_CONNECTION_REQUEST: u8 = 0xE0;
/// Connection Confirm TPDU code (high nibble).
pub const TPDU_CONNECTION_CONFIRM: u8 = 0xD0;
/// Data TPDU code.
pub const TPDU_DATA: u8 = 0xF0;
/// End-of-TSDU marker on every class-0 data TPDU.
pub const TPDU_DATA_EOT: u8 = 0x80;

/// RDP negotiation structure types embedded in the CR/CC variable part.
pub const TYPE_RDP_NEG_REQ: u8 = 0x01;
pub const TYPE_RDP_NEG_RSP: u8 = 0x02;

/// Standard RDP security (no external TLS upgrade requested).
pub const PROTOCOL_RDP: u32 = 0x0000_0000;

const NEG_STRUCT_LENGTH: usize = 8;

/// Parsed client Connection Request.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionRequest {
    /// Security protocols the client advertised via RDP_NEG_REQ (0 if absent).
    pub requested_protocols: u32,
    /// Legacy mstshash cookie, when the client sent one.
    pub cookie: Option<String>,
}

/// X.224 TPDU utilities for the connection and data phases.
pub struct X224Codec;

impl X224Codec {
    /// Reads an X.224 Connection Request TPDU, including the optional cookie
    /// and RDP negotiation request from the variable part.
    ///
    /// The stream must be positioned after the TPKT header.
    ///
    /// # Errors
    ///
    /// - `RdpError::Framing` - Truncated TPDU
    /// - `RdpError::Protocol` - Wrong TPDU code or malformed negotiation data
    pub fn read_connection_request(s: &mut Bytes) -> Result<ConnectionRequest, RdpError> {
        if s.remaining() < 7 {
            return Err(RdpError::Framing {
                reason: "connection request TPDU truncated".to_string(),
            });
        }

        let li = s.get_u8() as usize;
        let code = s.get_u8();
        if code & 0xF0 != TPDU_CONNECTION_REQUEST {
            return Err(RdpError::Protocol {
                message: format!("expected connection request TPDU, got code {code:#04x}"),
            });
        }

        // dst-ref, src-ref, class option
        s.advance(5);

        let var_len = li.saturating_sub(6);
        if var_len > s.remaining() {
            return Err(RdpError::Framing {
                reason: "connection request variable part truncated".to_string(),
            });
        }
        let var = s.split_to(var_len);

        let (cookie, rest) = Self::split_cookie(var.as_ref());
        let requested_protocols = Self::read_negotiation_request(rest)?;

        Ok(ConnectionRequest {
            requested_protocols,
            cookie,
        })
    }

    /// Builds a complete Connection Confirm frame (TPKT included) answering
    /// a negotiation-capable client with the selected protocol.
    pub fn write_connection_confirm(selected_protocol: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(19);
        TpktCodec::write_header(&mut buf, 19);

        buf.put_u8(14); // LI: code through negotiation response
        buf.put_u8(TPDU_CONNECTION_CONFIRM);
        buf.put_u16(0); // dst-ref
        buf.put_u16(0x1234); // src-ref
        buf.put_u8(0); // class 0

        buf.put_u8(TYPE_RDP_NEG_RSP);
        buf.put_u8(0); // flags
        buf.put_u16_le(NEG_STRUCT_LENGTH as u16);
        buf.put_u32_le(selected_protocol);

        buf
    }

    /// Reads the 3-byte class-0 data TPDU header.
    ///
    /// # Errors
    ///
    /// - `RdpError::Framing` - Truncated header
    /// - `RdpError::Protocol` - Not a data TPDU
    pub fn read_data_header(s: &mut Bytes) -> Result<(), RdpError> {
        if s.remaining() < 3 {
            return Err(RdpError::Framing {
                reason: "X.224 data header truncated".to_string(),
            });
        }

        s.advance(1); // LI
        let code = s.get_u8();
        if code & 0xF0 != TPDU_DATA {
            return Err(RdpError::Protocol {
                message: format!("expected data TPDU, got code {code:#04x}"),
            });
        }
        s.advance(1); // EOT

        Ok(())
    }

    /// Writes the class-0 data TPDU header.
    pub fn write_data_header(buf: &mut Vec<u8>) {
        buf.put_u8(2);
        buf.put_u8(TPDU_DATA);
        buf.put_u8(TPDU_DATA_EOT);
    }

    fn split_cookie(var: &[u8]) -> (Option<String>, &[u8]) {
        // Cookies and routing tokens are CR/LF terminated ANSI text before
        // any negotiation structure.
        if var.first() == Some(&TYPE_RDP_NEG_REQ) {
            return (None, var);
        }
        match var.windows(2).position(|w| w == b"\r\n") {
            Some(pos) => {
                let cookie = String::from_utf8_lossy(&var[..pos]).into_owned();
                (Some(cookie), &var[pos + 2..])
            }
            None => (None, var),
        }
    }

    fn read_negotiation_request(rest: &[u8]) -> Result<u32, RdpError> {
        if rest.is_empty() {
            // Pre-negotiation client: standard RDP security implied.
            return Ok(PROTOCOL_RDP);
        }
        if rest.len() < NEG_STRUCT_LENGTH || rest[0] != TYPE_RDP_NEG_REQ {
            return Err(RdpError::Protocol {
                message: "malformed RDP negotiation request".to_string(),
            });
        }

        let mut neg = &rest[2..];
        let length = neg.get_u16_le();
        if length as usize != NEG_STRUCT_LENGTH {
            return Err(RdpError::Protocol {
                message: format!("RDP negotiation request length {length}"),
            });
        }

        Ok(neg.get_u32_le())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection_request(cookie: &[u8], protocols: Option<u32>) -> Bytes {
        let mut var = Vec::new();
        var.extend_from_slice(cookie);
        if let Some(protocols) = protocols {
            var.put_u8(TYPE_RDP_NEG_REQ);
            var.put_u8(0);
            var.put_u16_le(8);
            var.put_u32_le(protocols);
        }

        let mut buf = Vec::new();
        buf.put_u8((6 + var.len()) as u8);
        buf.put_u8(TPDU_CONNECTION_REQUEST);
        buf.put_u16(0);
        buf.put_u16(0);
        buf.put_u8(0);
        buf.extend_from_slice(&var);
        Bytes::from(buf)
    }

    #[test]
    fn test_connection_request_with_cookie_and_negotiation() {
        let mut s = connection_request(b"Cookie: mstshash=quay\r\n", Some(3));
        let req = X224Codec::read_connection_request(&mut s).unwrap();

        assert_eq!(req.requested_protocols, 3);
        assert_eq!(req.cookie.as_deref(), Some("Cookie: mstshash=quay"));
    }

    #[test]
    fn test_connection_request_without_negotiation() {
        let mut s = connection_request(b"", None);
        let req = X224Codec::read_connection_request(&mut s).unwrap();

        assert_eq!(req.requested_protocols, PROTOCOL_RDP);
        assert_eq!(req.cookie, None);
    }

    #[test]
    fn test_connection_request_rejects_wrong_code() {
        let mut s = Bytes::from_static(&[6, 0xD0, 0, 0, 0, 0, 0]);
        assert!(X224Codec::read_connection_request(&mut s).is_err());
    }

    #[test]
    fn test_connection_confirm_layout() {
        let frame = X224Codec::write_connection_confirm(PROTOCOL_RDP);

        assert_eq!(frame.len(), 19);
        assert_eq!(&frame[..4], &[3, 0, 0, 19]);
        assert_eq!(frame[5], TPDU_CONNECTION_CONFIRM);
        assert_eq!(frame[11], TYPE_RDP_NEG_RSP);
    }

    #[test]
    fn test_data_header_roundtrip() {
        let mut buf = Vec::new();
        X224Codec::write_data_header(&mut buf);

        let mut s = Bytes::from(buf);
        X224Codec::read_data_header(&mut s).unwrap();
        assert_eq!(s.remaining(), 0);
    }
}
