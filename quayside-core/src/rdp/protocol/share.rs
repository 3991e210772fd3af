//! Share-control and share-data headers plus the small data PDU bodies

use bytes::{Buf, BufMut, Bytes};

use crate::rdp::RdpError;

/// Version bits carried in the high byte of every share-control PDU type.
const PDU_TYPE_VERSION: u16 = 0x0010;

/// Share-control header size in bytes.
pub const SHARE_CONTROL_HEADER_LENGTH: usize = 6;
/// Share-data header size in bytes, excluding the control header.
pub const SHARE_DATA_HEADER_LENGTH: usize = 12;

/// Low-priority stream id used for server data PDUs.
const STREAM_LOW: u8 = 1;

/// Control PDU actions.
pub const CTRLACTION_REQUEST_CONTROL: u16 = 0x0001;
pub const CTRLACTION_GRANTED_CONTROL: u16 = 0x0002;
pub const CTRLACTION_DETACH: u16 = 0x0003;
pub const CTRLACTION_COOPERATE: u16 = 0x0004;

/// Share-control PDU families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlPduType {
    DemandActive,
    ConfirmActive,
    DeactivateAll,
    Data,
    ServerRedirect,
    Unknown(u16),
}

impl ControlPduType {
    pub fn from_u16(value: u16) -> Self {
        match value & 0x000F {
            0x1 => ControlPduType::DemandActive,
            0x3 => ControlPduType::ConfirmActive,
            0x6 => ControlPduType::DeactivateAll,
            0x7 => ControlPduType::Data,
            0xA => ControlPduType::ServerRedirect,
            other => ControlPduType::Unknown(other),
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            ControlPduType::DemandActive => 0x1,
            ControlPduType::ConfirmActive => 0x3,
            ControlPduType::DeactivateAll => 0x6,
            ControlPduType::Data => 0x7,
            ControlPduType::ServerRedirect => 0xA,
            ControlPduType::Unknown(value) => value,
        }
    }
}

impl std::fmt::Display for ControlPduType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlPduType::DemandActive => write!(f, "Demand-Active"),
            ControlPduType::ConfirmActive => write!(f, "Confirm-Active"),
            ControlPduType::DeactivateAll => write!(f, "Deactivate-All"),
            ControlPduType::Data => write!(f, "Data"),
            ControlPduType::ServerRedirect => write!(f, "Server-Redirect"),
            ControlPduType::Unknown(value) => write!(f, "Unknown({value:#x})"),
        }
    }
}

/// Share-data PDU subtypes dispatched by the active-phase demultiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataPduType {
    Control,
    Input,
    Synchronize,
    RefreshRect,
    SuppressOutput,
    ShutdownRequest,
    ShutdownDenied,
    FontList,
    FontMap,
    BitmapCachePersistentList,
    Unknown(u8),
}

impl DataPduType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            20 => DataPduType::Control,
            28 => DataPduType::Input,
            31 => DataPduType::Synchronize,
            33 => DataPduType::RefreshRect,
            35 => DataPduType::SuppressOutput,
            36 => DataPduType::ShutdownRequest,
            37 => DataPduType::ShutdownDenied,
            39 => DataPduType::FontList,
            40 => DataPduType::FontMap,
            43 => DataPduType::BitmapCachePersistentList,
            other => DataPduType::Unknown(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            DataPduType::Control => 20,
            DataPduType::Input => 28,
            DataPduType::Synchronize => 31,
            DataPduType::RefreshRect => 33,
            DataPduType::SuppressOutput => 35,
            DataPduType::ShutdownRequest => 36,
            DataPduType::ShutdownDenied => 37,
            DataPduType::FontList => 39,
            DataPduType::FontMap => 40,
            DataPduType::BitmapCachePersistentList => 43,
            DataPduType::Unknown(value) => value,
        }
    }
}

/// Parsed share-control header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareControlHeader {
    pub length: u16,
    pub pdu_type: ControlPduType,
    pub pdu_source: u16,
}

impl ShareControlHeader {
    /// Reads a share-control header.
    ///
    /// # Errors
    ///
    /// - `RdpError::Framing` - Truncated header
    pub fn read(s: &mut Bytes) -> Result<Self, RdpError> {
        if s.remaining() < SHARE_CONTROL_HEADER_LENGTH {
            return Err(RdpError::Framing {
                reason: "share-control header truncated".to_string(),
            });
        }

        let length = s.get_u16_le();
        let pdu_type = ControlPduType::from_u16(s.get_u16_le());
        let pdu_source = s.get_u16_le();

        Ok(Self {
            length,
            pdu_type,
            pdu_source,
        })
    }

    /// Writes a share-control header for a PDU of `length` total bytes
    /// (header included).
    pub fn write(buf: &mut Vec<u8>, pdu_type: ControlPduType, pdu_source: u16, length: u16) {
        buf.put_u16_le(length);
        buf.put_u16_le(pdu_type.as_u16() | PDU_TYPE_VERSION);
        buf.put_u16_le(pdu_source);
    }
}

/// Parsed share-data header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareDataHeader {
    pub share_id: u32,
    pub stream_id: u8,
    pub length: u16,
    pub pdu_type: DataPduType,
    pub compressed_type: u8,
    pub compressed_length: u16,
}

impl ShareDataHeader {
    /// Reads a share-data header (the control header must already be
    /// consumed).
    ///
    /// # Errors
    ///
    /// - `RdpError::Framing` - Truncated header
    pub fn read(s: &mut Bytes) -> Result<Self, RdpError> {
        if s.remaining() < SHARE_DATA_HEADER_LENGTH {
            return Err(RdpError::Framing {
                reason: "share-data header truncated".to_string(),
            });
        }

        let share_id = s.get_u32_le();
        s.advance(1); // pad
        let stream_id = s.get_u8();
        let length = s.get_u16_le();
        let pdu_type = DataPduType::from_u8(s.get_u8());
        let compressed_type = s.get_u8();
        let compressed_length = s.get_u16_le();

        Ok(Self {
            share_id,
            stream_id,
            length,
            pdu_type,
            compressed_type,
            compressed_length,
        })
    }

    /// Writes a share-data header for `body_len` bytes of uncompressed
    /// payload.
    pub fn write(buf: &mut Vec<u8>, share_id: u32, pdu_type: DataPduType, body_len: usize) {
        buf.put_u32_le(share_id);
        buf.put_u8(0); // pad
        buf.put_u8(STREAM_LOW);
        buf.put_u16_le((SHARE_DATA_HEADER_LENGTH + body_len) as u16);
        buf.put_u8(pdu_type.as_u8());
        buf.put_u8(0); // compressedType
        buf.put_u16_le(0); // compressedLength
    }
}

/// Synchronize PDU body (both directions share the layout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynchronizePdu {
    pub message_type: u16,
    pub target_user: u16,
}

impl SynchronizePdu {
    /// # Errors
    ///
    /// - `RdpError::Framing` - Truncated body
    pub fn read(s: &mut Bytes) -> Result<Self, RdpError> {
        if s.remaining() < 4 {
            return Err(RdpError::Framing {
                reason: "synchronize PDU truncated".to_string(),
            });
        }
        Ok(Self {
            message_type: s.get_u16_le(),
            target_user: s.get_u16_le(),
        })
    }

    pub fn write(buf: &mut Vec<u8>, target_user: u16) {
        buf.put_u16_le(1); // SYNCMSGTYPE_SYNC
        buf.put_u16_le(target_user);
    }
}

/// Control PDU body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlPdu {
    pub action: u16,
    pub grant_id: u16,
    pub control_id: u32,
}

impl ControlPdu {
    /// # Errors
    ///
    /// - `RdpError::Framing` - Truncated body
    pub fn read(s: &mut Bytes) -> Result<Self, RdpError> {
        if s.remaining() < 8 {
            return Err(RdpError::Framing {
                reason: "control PDU truncated".to_string(),
            });
        }
        Ok(Self {
            action: s.get_u16_le(),
            grant_id: s.get_u16_le(),
            control_id: s.get_u32_le(),
        })
    }

    pub fn write(buf: &mut Vec<u8>, action: u16, grant_id: u16, control_id: u32) {
        buf.put_u16_le(action);
        buf.put_u16_le(grant_id);
        buf.put_u32_le(control_id);
    }
}

/// Client font-list PDU body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FontListPdu {
    pub list_flags: u16,
}

impl FontListPdu {
    /// # Errors
    ///
    /// - `RdpError::Framing` - Truncated body
    pub fn read(s: &mut Bytes) -> Result<Self, RdpError> {
        if s.remaining() < 8 {
            return Err(RdpError::Framing {
                reason: "font-list PDU truncated".to_string(),
            });
        }
        s.advance(4); // numberFonts, totalNumFonts: ignored
        let list_flags = s.get_u16_le();
        s.advance(2); // entrySize
        Ok(Self { list_flags })
    }
}

/// Server font-map PDU body.
pub struct FontMapPdu;

impl FontMapPdu {
    pub fn write(buf: &mut Vec<u8>) {
        buf.put_u16_le(0); // numberEntries
        buf.put_u16_le(0); // totalNumEntries
        buf.put_u16_le(0x0003); // FONTMAP_FIRST | FONTMAP_LAST
        buf.put_u16_le(4); // entrySize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_header_roundtrip() {
        let mut buf = Vec::new();
        ShareControlHeader::write(&mut buf, ControlPduType::Data, 1002, 30);

        let mut s = Bytes::from(buf);
        let header = ShareControlHeader::read(&mut s).unwrap();

        assert_eq!(header.length, 30);
        assert_eq!(header.pdu_type, ControlPduType::Data);
        assert_eq!(header.pdu_source, 1002);
    }

    #[test]
    fn test_data_header_roundtrip() {
        let mut buf = Vec::new();
        ShareDataHeader::write(&mut buf, 0x0001_03EA, DataPduType::FontMap, 8);

        let mut s = Bytes::from(buf);
        let header = ShareDataHeader::read(&mut s).unwrap();

        assert_eq!(header.share_id, 0x0001_03EA);
        assert_eq!(header.pdu_type, DataPduType::FontMap);
        assert_eq!(header.length, (SHARE_DATA_HEADER_LENGTH + 8) as u16);
    }

    #[test]
    fn test_unknown_data_pdu_type_is_preserved() {
        assert_eq!(DataPduType::from_u8(0xEE), DataPduType::Unknown(0xEE));
        assert_eq!(DataPduType::Unknown(0xEE).as_u8(), 0xEE);
    }

    #[test]
    fn test_control_pdu_roundtrip() {
        let mut buf = Vec::new();
        ControlPdu::write(&mut buf, CTRLACTION_COOPERATE, 0, 0);

        let mut s = Bytes::from(buf);
        let pdu = ControlPdu::read(&mut s).unwrap();
        assert_eq!(pdu.action, CTRLACTION_COOPERATE);
    }

    #[test]
    fn test_font_list_reads_flags() {
        let mut buf = Vec::new();
        buf.put_u16_le(0);
        buf.put_u16_le(0);
        buf.put_u16_le(0x0003);
        buf.put_u16_le(0x0032);

        let mut s = Bytes::from(buf);
        assert_eq!(FontListPdu::read(&mut s).unwrap().list_flags, 0x0003);
    }
}
