//! Capability exchange: Demand-Active construction and Confirm-Active parsing

use bytes::{Buf, BufMut, Bytes};

use crate::rdp::RdpError;
use crate::rdp::settings::Settings;

/// Capability set types the server emits or inspects.
const CAPSTYPE_GENERAL: u16 = 1;
const CAPSTYPE_BITMAP: u16 = 2;
const CAPSTYPE_ORDER: u16 = 3;
const CAPSTYPE_POINTER: u16 = 8;
const CAPSTYPE_INPUT: u16 = 13;
const CAPSTYPE_VIRTUAL_CHANNEL: u16 = 20;

/// Input capability flags advertised by the server.
const INPUT_FLAG_SCANCODES: u16 = 0x0001;
const INPUT_FLAG_FASTPATH_INPUT: u16 = 0x0008;
const INPUT_FLAG_UNICODE: u16 = 0x0010;
const INPUT_FLAG_FASTPATH_INPUT2: u16 = 0x0020;

const SOURCE_DESCRIPTOR: &[u8] = b"RDP\0";

/// Client capabilities the engine keeps from Confirm-Active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientCapabilities {
    pub share_id: u32,
    pub desktop_width: u16,
    pub desktop_height: u16,
    pub color_depth: u16,
    pub capability_count: u16,
}

/// Builds the Demand-Active body (share-control header excluded): share id,
/// source descriptor, the server capability sets, and the session id.
pub fn write_demand_active(settings: &Settings) -> Vec<u8> {
    let caps = write_server_capability_sets(settings);

    let mut body = Vec::with_capacity(caps.len() + 20);
    body.put_u32_le(settings.share_id);
    body.put_u16_le(SOURCE_DESCRIPTOR.len() as u16);
    body.put_u16_le((caps.len() + 4) as u16); // numberCapabilities + pad included
    body.extend_from_slice(SOURCE_DESCRIPTOR);
    body.put_u16_le(6); // numberCapabilities
    body.put_u16_le(0); // pad
    body.extend_from_slice(&caps);
    body.put_u32_le(0); // sessionId
    body
}

/// Builds the Deactivate-All body used to start a reactivation sequence.
pub fn write_deactivate_all(share_id: u32) -> Vec<u8> {
    let mut body = Vec::with_capacity(8);
    body.put_u32_le(share_id);
    body.put_u16_le(1); // lengthSourceDescriptor
    body.put_u8(0);
    body
}

/// Parses a Confirm-Active body (share-control header already consumed),
/// extracting the desktop geometry the client committed to.
///
/// # Errors
///
/// - `RdpError::Framing` - Truncated body or capability set overrunning the
///   stream
pub fn read_confirm_active(s: &mut Bytes) -> Result<ClientCapabilities, RdpError> {
    if s.remaining() < 10 {
        return Err(RdpError::Framing {
            reason: "confirm-active body truncated".to_string(),
        });
    }

    let share_id = s.get_u32_le();
    s.advance(2); // originatorId
    let source_len = s.get_u16_le() as usize;
    s.advance(2); // lengthCombinedCapabilities

    if s.remaining() < source_len + 4 {
        return Err(RdpError::Framing {
            reason: "confirm-active source descriptor truncated".to_string(),
        });
    }
    s.advance(source_len);

    let capability_count = s.get_u16_le();
    s.advance(2); // pad

    let mut caps = ClientCapabilities {
        share_id,
        desktop_width: 0,
        desktop_height: 0,
        color_depth: 0,
        capability_count,
    };

    for _ in 0..capability_count {
        if s.remaining() < 4 {
            return Err(RdpError::Framing {
                reason: "capability set header truncated".to_string(),
            });
        }
        let set_type = s.get_u16_le();
        let set_length = s.get_u16_le() as usize;
        let payload_len = set_length.saturating_sub(4);
        if s.remaining() < payload_len {
            return Err(RdpError::Framing {
                reason: format!("capability set {set_type} overruns the stream"),
            });
        }

        let mut payload = s.split_to(payload_len);
        if set_type == CAPSTYPE_BITMAP && payload.remaining() >= 12 {
            caps.color_depth = payload.get_u16_le();
            payload.advance(6); // receive1/4/8BitPerPixel
            caps.desktop_width = payload.get_u16_le();
            caps.desktop_height = payload.get_u16_le();
        }
    }

    Ok(caps)
}

fn write_server_capability_sets(settings: &Settings) -> Vec<u8> {
    let mut caps = Vec::with_capacity(256);
    write_general_capability_set(&mut caps, settings);
    write_bitmap_capability_set(&mut caps, settings);
    write_order_capability_set(&mut caps);
    write_pointer_capability_set(&mut caps);
    write_input_capability_set(&mut caps);
    write_virtual_channel_capability_set(&mut caps);
    caps
}

fn write_general_capability_set(buf: &mut Vec<u8>, settings: &Settings) {
    buf.put_u16_le(CAPSTYPE_GENERAL);
    buf.put_u16_le(24);
    buf.put_u16_le(settings.os_major_type);
    buf.put_u16_le(settings.os_minor_type);
    buf.put_u16_le(0x0200); // protocolVersion
    buf.put_u16_le(0); // pad
    buf.put_u16_le(0); // generalCompressionTypes
    buf.put_u16_le(0x0001); // extraFlags: fast-path output supported
    buf.put_u16_le(0); // updateCapabilityFlag
    buf.put_u16_le(0); // remoteUnshareFlag
    buf.put_u16_le(0); // generalCompressionLevel
    buf.put_u8(1); // refreshRectSupport
    buf.put_u8(1); // suppressOutputSupport
}

fn write_bitmap_capability_set(buf: &mut Vec<u8>, settings: &Settings) {
    buf.put_u16_le(CAPSTYPE_BITMAP);
    buf.put_u16_le(28);
    buf.put_u16_le(settings.color_depth);
    buf.put_u16_le(1); // receive1BitPerPixel
    buf.put_u16_le(1); // receive4BitsPerPixel
    buf.put_u16_le(1); // receive8BitsPerPixel
    buf.put_u16_le(settings.desktop_width);
    buf.put_u16_le(settings.desktop_height);
    buf.put_u16_le(0); // pad
    buf.put_u16_le(1); // desktopResizeFlag
    buf.put_u16_le(1); // bitmapCompressionFlag
    buf.put_u8(0); // highColorFlags
    buf.put_u8(0); // drawingFlags
    buf.put_u16_le(1); // multipleRectangleSupport
    buf.put_u16_le(0); // pad
}

fn write_order_capability_set(buf: &mut Vec<u8>) {
    buf.put_u16_le(CAPSTYPE_ORDER);
    buf.put_u16_le(88);
    buf.extend_from_slice(&[0u8; 16]); // terminalDescriptor
    buf.put_u32_le(0); // pad
    buf.put_u16_le(1); // desktopSaveXGranularity
    buf.put_u16_le(20); // desktopSaveYGranularity
    buf.put_u16_le(0); // pad
    buf.put_u16_le(1); // maximumOrderLevel
    buf.put_u16_le(0); // numberFonts
    buf.put_u16_le(0x000A); // orderFlags: negotiate, zero-bounds deltas
    buf.extend_from_slice(&[0u8; 32]); // orderSupport: none
    buf.put_u16_le(0); // textFlags
    buf.put_u16_le(0); // orderSupportExFlags
    buf.put_u32_le(0); // pad
    buf.put_u32_le(0); // desktopSaveSize
    buf.put_u16_le(0); // pad
    buf.put_u16_le(0); // pad
    buf.put_u16_le(0); // textANSICodePage
    buf.put_u16_le(0); // pad
}

fn write_pointer_capability_set(buf: &mut Vec<u8>) {
    buf.put_u16_le(CAPSTYPE_POINTER);
    buf.put_u16_le(10);
    buf.put_u16_le(1); // colorPointerFlag
    buf.put_u16_le(20); // colorPointerCacheSize
    buf.put_u16_le(21); // pointerCacheSize
}

fn write_input_capability_set(buf: &mut Vec<u8>) {
    buf.put_u16_le(CAPSTYPE_INPUT);
    buf.put_u16_le(88);
    buf.put_u16_le(
        INPUT_FLAG_SCANCODES
            | INPUT_FLAG_FASTPATH_INPUT
            | INPUT_FLAG_UNICODE
            | INPUT_FLAG_FASTPATH_INPUT2,
    );
    buf.put_u16_le(0); // pad
    buf.put_u32_le(0); // keyboardLayout
    buf.put_u32_le(0); // keyboardType
    buf.put_u32_le(0); // keyboardSubType
    buf.put_u32_le(0); // keyboardFunctionKey
    buf.extend_from_slice(&[0u8; 64]); // imeFileName
}

fn write_virtual_channel_capability_set(buf: &mut Vec<u8>) {
    buf.put_u16_le(CAPSTYPE_VIRTUAL_CHANNEL);
    buf.put_u16_le(12);
    buf.put_u32_le(0); // flags: no compression
    buf.put_u32_le(1600); // VCChunkSize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolConfig;

    fn confirm_active_body(share_id: u32, width: u16, height: u16) -> Bytes {
        let mut caps = Vec::new();
        // Client bitmap capability set.
        caps.put_u16_le(CAPSTYPE_BITMAP);
        caps.put_u16_le(28);
        caps.put_u16_le(32);
        caps.put_u16_le(1);
        caps.put_u16_le(1);
        caps.put_u16_le(1);
        caps.put_u16_le(width);
        caps.put_u16_le(height);
        caps.extend_from_slice(&[0u8; 12]);
        // An opaque set the server skips.
        caps.put_u16_le(CAPSTYPE_ORDER);
        caps.put_u16_le(8);
        caps.put_u32_le(0);

        let mut body = Vec::new();
        body.put_u32_le(share_id);
        body.put_u16_le(0x03EA); // originatorId
        body.put_u16_le(4);
        body.put_u16_le((caps.len() + 4) as u16);
        body.extend_from_slice(b"MSTC");
        body.put_u16_le(2);
        body.put_u16_le(0);
        body.extend_from_slice(&caps);
        Bytes::from(body)
    }

    #[test]
    fn test_confirm_active_extracts_bitmap_geometry() {
        let mut s = confirm_active_body(0x0001_03EA, 1920, 1080);
        let caps = read_confirm_active(&mut s).unwrap();

        assert_eq!(caps.share_id, 0x0001_03EA);
        assert_eq!(caps.desktop_width, 1920);
        assert_eq!(caps.desktop_height, 1080);
        assert_eq!(caps.color_depth, 32);
        assert_eq!(caps.capability_count, 2);
    }

    #[test]
    fn test_confirm_active_rejects_overrunning_set() {
        let mut body = Vec::new();
        body.put_u32_le(1);
        body.put_u16_le(0x03EA);
        body.put_u16_le(0);
        body.put_u16_le(0);
        body.put_u16_le(1);
        body.put_u16_le(0);
        body.put_u16_le(CAPSTYPE_GENERAL);
        body.put_u16_le(64); // claims 60 payload bytes, none follow

        let mut s = Bytes::from(body);
        assert!(read_confirm_active(&mut s).is_err());
    }

    #[test]
    fn test_demand_active_counts_capability_sets() {
        let settings = Settings::new(&ProtocolConfig::default());
        let body = write_demand_active(&settings);

        // shareId + descriptor lengths + "RDP\0" + count/pad prefix the sets.
        let count = u16::from_le_bytes([body[12], body[13]]);
        assert_eq!(count, 6);
        // General set leads with its type and declared 24-byte length.
        assert_eq!(u16::from_le_bytes([body[16], body[17]]), CAPSTYPE_GENERAL);
        assert_eq!(u16::from_le_bytes([body[18], body[19]]), 24);
    }
}
