//! Server-side licensing phase
//!
//! The server short-circuits licensing with the "valid client" error alert:
//! no license is issued and the client proceeds directly to capability
//! exchange. That is the entire licensing exchange this engine performs.

use bytes::BufMut;

use super::protocol::client_info::{SEC_LICENSE_PKT, write_security_header};

const ERROR_ALERT: u8 = 0xFF;
const PREAMBLE_VERSION_3_0: u8 = 0x03;
const STATUS_VALID_CLIENT: u32 = 0x0000_0007;
const ST_NO_TRANSITION: u32 = 0x0000_0002;
const BB_ERROR_BLOB: u16 = 0x0004;

/// Where the licensing exchange stands for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LicenseState {
    #[default]
    Initial,
    Completed,
}

/// Builds the licensing payload (security header included) telling the
/// client it is a valid licensed client.
pub fn write_valid_client_packet() -> Vec<u8> {
    let mut buf = Vec::with_capacity(20);
    write_security_header(&mut buf, SEC_LICENSE_PKT);

    buf.put_u8(ERROR_ALERT);
    buf.put_u8(PREAMBLE_VERSION_3_0);
    buf.put_u16_le(16); // wMsgSize: preamble + error message

    buf.put_u32_le(STATUS_VALID_CLIENT);
    buf.put_u32_le(ST_NO_TRANSITION);
    buf.put_u16_le(BB_ERROR_BLOB);
    buf.put_u16_le(0); // empty blob

    buf
}
