//! RDP security header and the client info packet

use bytes::{Buf, BufMut, Bytes};

use crate::rdp::RdpError;

/// Basic security header flags.
pub const SEC_EXCHANGE_PKT: u16 = 0x0001;
pub const SEC_ENCRYPT: u16 = 0x0008;
pub const SEC_INFO_PKT: u16 = 0x0040;
pub const SEC_LICENSE_PKT: u16 = 0x0080;

/// Info packet flags.
pub const INFO_UNICODE: u32 = 0x0000_0010;

/// Reads the basic (non-encrypting) security header and returns its flags.
///
/// # Errors
///
/// - `RdpError::Framing` - Truncated header
pub fn read_security_header(s: &mut Bytes) -> Result<u16, RdpError> {
    if s.remaining() < 4 {
        return Err(RdpError::Framing {
            reason: "security header truncated".to_string(),
        });
    }
    let flags = s.get_u16_le();
    s.advance(2); // flagsHi
    Ok(flags)
}

/// Writes the basic security header.
pub fn write_security_header(buf: &mut Vec<u8>, flags: u16) {
    buf.put_u16_le(flags);
    buf.put_u16_le(0);
}

/// Fields the server keeps from the client info packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub flags: u32,
    pub domain: String,
    pub username: String,
}

impl ClientInfo {
    /// Reads a TS_INFO_PACKET, keeping the identity fields and discarding
    /// credentials and shell configuration. Extended info past the working
    /// directory is not interpreted.
    ///
    /// # Errors
    ///
    /// - `RdpError::Framing` - Truncated packet or string fields shorter than
    ///   their declared sizes
    pub fn read(s: &mut Bytes) -> Result<Self, RdpError> {
        if s.remaining() < 18 {
            return Err(RdpError::Framing {
                reason: "client info packet truncated".to_string(),
            });
        }

        s.advance(4); // codePage
        let flags = s.get_u32_le();
        let cb_domain = s.get_u16_le() as usize;
        let cb_username = s.get_u16_le() as usize;
        let cb_password = s.get_u16_le() as usize;
        let cb_alternate_shell = s.get_u16_le() as usize;
        let cb_working_dir = s.get_u16_le() as usize;

        let unicode = flags & INFO_UNICODE != 0;
        // Each cb excludes the mandatory null terminator (2 bytes in unicode
        // builds, 1 otherwise).
        let terminator = if unicode { 2 } else { 1 };

        let domain = Self::read_string(s, cb_domain, terminator, unicode)?;
        let username = Self::read_string(s, cb_username, terminator, unicode)?;
        Self::skip_string(s, cb_password, terminator)?;
        Self::skip_string(s, cb_alternate_shell, terminator)?;
        Self::skip_string(s, cb_working_dir, terminator)?;

        Ok(Self {
            flags,
            domain,
            username,
        })
    }

    fn read_string(
        s: &mut Bytes,
        length: usize,
        terminator: usize,
        unicode: bool,
    ) -> Result<String, RdpError> {
        if s.remaining() < length + terminator {
            return Err(RdpError::Framing {
                reason: "client info string truncated".to_string(),
            });
        }

        let raw = s.split_to(length);
        s.advance(terminator);

        if unicode {
            let units: Vec<u16> = raw
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            Ok(String::from_utf16_lossy(&units))
        } else {
            Ok(String::from_utf8_lossy(&raw).into_owned())
        }
    }

    fn skip_string(s: &mut Bytes, length: usize, terminator: usize) -> Result<(), RdpError> {
        if s.remaining() < length + terminator {
            return Err(RdpError::Framing {
                reason: "client info string truncated".to_string(),
            });
        }
        s.advance(length + terminator);
        Ok(())
    }
}
