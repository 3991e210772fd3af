//! T.125 MCS: connect phase, domain PDUs, and channel multiplexing headers

use bytes::{Buf, BufMut, Bytes};

use super::{ber, per};
use crate::rdp::RdpError;

/// The MCS channel carrying all share-control traffic.
pub const MCS_GLOBAL_CHANNEL_ID: u16 = 1003;

/// Lowest dynamically assigned MCS user id.
pub const MCS_USER_CHANNEL_BASE: u16 = 1001;

/// BER application tags for the connect phase.
const MCS_TYPE_CONNECT_INITIAL: u8 = 101;
const MCS_TYPE_CONNECT_RESPONSE: u8 = 102;

/// Domain PDU choices (T.125 DomainMCSPDU, encoded as `choice << 2`).
const MCS_ERECT_DOMAIN_REQUEST: u8 = 1;
const MCS_DISCONNECT_PROVIDER_ULTIMATUM: u8 = 8;
const MCS_ATTACH_USER_REQUEST: u8 = 10;
const MCS_ATTACH_USER_CONFIRM: u8 = 11;
const MCS_CHANNEL_JOIN_REQUEST: u8 = 14;
const MCS_CHANNEL_JOIN_CONFIRM: u8 = 15;
const MCS_SEND_DATA_REQUEST: u8 = 25;
const MCS_SEND_DATA_INDICATION: u8 = 26;

/// T.124 object identifier for the GCC conference protocol.
const T124_02_98_OID: [u8; 6] = [0x00, 0x05, 0x00, 0x14, 0x7C, 0x00];

/// Server data block types inside the GCC conference create response.
const SC_CORE: u16 = 0x0C01;
const SC_SECURITY: u16 = 0x0C02;
const SC_NET: u16 = 0x0C03;

const RDP_VERSION_5_PLUS: u32 = 0x0008_0004;

/// Channel bookkeeping for one MCS domain.
///
/// The server owns the id assignments: the client's user channel is handed
/// out in Attach-User Confirm, and activation requires both the user channel
/// and the global channel to be joined.
#[derive(Debug, Clone)]
pub struct McsChannel {
    pub user_channel_id: u16,
    user_joined: bool,
    global_joined: bool,
}

impl Default for McsChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl McsChannel {
    pub fn new() -> Self {
        Self {
            user_channel_id: MCS_USER_CHANNEL_BASE + 1,
            user_joined: false,
            global_joined: false,
        }
    }

    /// Records a successful join and reports whether the channel was one the
    /// session needs.
    pub fn mark_joined(&mut self, channel_id: u16) -> bool {
        if channel_id == self.user_channel_id {
            self.user_joined = true;
            true
        } else if channel_id == MCS_GLOBAL_CHANNEL_ID {
            self.global_joined = true;
            true
        } else {
            false
        }
    }

    /// True once both the user channel and the global channel are joined.
    pub fn all_joined(&self) -> bool {
        self.user_joined && self.global_joined
    }
}

/// Header fields of an inbound Send-Data Request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McsDataHeader {
    pub initiator: u16,
    pub channel_id: u16,
    pub length: usize,
}

/// MCS PDU parsing and construction for the server role.
pub struct McsCodec;

impl McsCodec {
    /// Reads a Connect-Initial PDU, validating its BER structure. The GCC
    /// conference payload is consumed without interpretation; client
    /// capabilities arrive later via Confirm-Active.
    ///
    /// The stream must be positioned after the X.224 data header.
    ///
    /// # Errors
    ///
    /// - `RdpError::Framing` / `RdpError::Protocol` - Malformed BER structure
    pub fn read_connect_initial(s: &mut Bytes) -> Result<(), RdpError> {
        ber::read_application_tag(s, MCS_TYPE_CONNECT_INITIAL)?;

        ber::read_octet_string(s)?; // callingDomainSelector
        ber::read_octet_string(s)?; // calledDomainSelector
        ber::read_boolean(s)?; // upwardFlag

        // target, minimum, and maximum domain parameters
        for _ in 0..3 {
            let length = ber::read_tag(s, ber::TAG_SEQUENCE)?;
            if s.remaining() < length {
                return Err(RdpError::Framing {
                    reason: "MCS domain parameters truncated".to_string(),
                });
            }
            s.advance(length);
        }

        ber::read_octet_string(s)?; // userData (GCC conference create request)
        Ok(())
    }

    /// Builds the Connect-Response body: result, domain parameters, and a GCC
    /// conference create response advertising the server's core, security,
    /// and network blocks.
    pub fn write_connect_response(requested_protocols: u32) -> Vec<u8> {
        let gcc = Self::write_conference_create_response(requested_protocols);

        let mut inner = Vec::with_capacity(gcc.len() + 64);
        ber::write_enumerated(&mut inner, 0); // result: rt-successful
        ber::write_integer(&mut inner, 0); // calledConnectId
        Self::write_domain_parameters(&mut inner);
        ber::write_octet_string(&mut inner, &gcc);

        let mut body = Vec::with_capacity(inner.len() + 8);
        ber::write_application_tag(&mut body, MCS_TYPE_CONNECT_RESPONSE, inner.len());
        body.extend_from_slice(&inner);
        body
    }

    /// Reads an Erect-Domain Request.
    ///
    /// # Errors
    ///
    /// - `RdpError::Framing` / `RdpError::Protocol` - Not an erect-domain PDU
    pub fn read_erect_domain_request(s: &mut Bytes) -> Result<(), RdpError> {
        Self::expect_choice(s, MCS_ERECT_DOMAIN_REQUEST)?;
        per::read_integer(s)?; // subHeight
        per::read_integer(s)?; // subInterval
        Ok(())
    }

    /// Reads an Attach-User Request.
    ///
    /// # Errors
    ///
    /// - `RdpError::Framing` / `RdpError::Protocol` - Not an attach-user PDU
    pub fn read_attach_user_request(s: &mut Bytes) -> Result<(), RdpError> {
        Self::expect_choice(s, MCS_ATTACH_USER_REQUEST)?;
        Ok(())
    }

    /// Builds an Attach-User Confirm assigning `user_id` as the initiator.
    pub fn write_attach_user_confirm(user_id: u16) -> Vec<u8> {
        let mut body = Vec::with_capacity(4);
        per::write_choice(&mut body, (MCS_ATTACH_USER_CONFIRM << 2) | 2);
        per::write_enumerated(&mut body, 0); // rt-successful
        per::write_integer16(&mut body, user_id, MCS_USER_CHANNEL_BASE);
        body
    }

    /// Reads a Channel-Join Request and returns (initiator, channel id).
    ///
    /// # Errors
    ///
    /// - `RdpError::Framing` / `RdpError::Protocol` - Not a channel-join PDU
    pub fn read_channel_join_request(s: &mut Bytes) -> Result<(u16, u16), RdpError> {
        Self::expect_choice(s, MCS_CHANNEL_JOIN_REQUEST)?;
        let initiator = per::read_integer16(s, MCS_USER_CHANNEL_BASE)?;
        let channel_id = per::read_integer16(s, 0)?;
        Ok((initiator, channel_id))
    }

    /// Builds a Channel-Join Confirm for a granted join.
    pub fn write_channel_join_confirm(user_id: u16, channel_id: u16) -> Vec<u8> {
        let mut body = Vec::with_capacity(8);
        per::write_choice(&mut body, (MCS_CHANNEL_JOIN_CONFIRM << 2) | 2);
        per::write_enumerated(&mut body, 0); // rt-successful
        per::write_integer16(&mut body, user_id, MCS_USER_CHANNEL_BASE);
        per::write_integer16(&mut body, channel_id, 0); // requested
        per::write_integer16(&mut body, channel_id, 0);
        body
    }

    /// Builds a Disconnect-Provider Ultimatum.
    pub fn write_disconnect_provider_ultimatum() -> Vec<u8> {
        // Choice octet plus the reason (rn-user-requested) packed across the
        // following octet, as emitted on the wire by interoperable stacks.
        vec![(MCS_DISCONNECT_PROVIDER_ULTIMATUM << 2) | 1, 0x80]
    }

    /// Reads the TPKT, X.224, and Send-Data Request headers that prefix every
    /// active-phase legacy PDU, returning the channel routing information.
    ///
    /// # Errors
    ///
    /// - `RdpError::Framing` - Truncated or inconsistent framing
    /// - `RdpError::Disconnected` - The client sent a disconnect ultimatum
    /// - `RdpError::Protocol` - Unexpected domain PDU
    pub fn read_data_header(s: &mut Bytes) -> Result<McsDataHeader, RdpError> {
        super::tpkt::TpktCodec::read_header(s)?;
        super::x224::X224Codec::read_data_header(s)?;

        let choice = per::read_choice(s)?;
        match choice >> 2 {
            MCS_SEND_DATA_REQUEST => {}
            MCS_DISCONNECT_PROVIDER_ULTIMATUM => return Err(RdpError::Disconnected),
            other => {
                return Err(RdpError::Protocol {
                    message: format!("unexpected MCS domain PDU choice {other}"),
                });
            }
        }

        let initiator = per::read_integer16(s, MCS_USER_CHANNEL_BASE)?;
        let channel_id = per::read_integer16(s, 0)?;
        if s.remaining() < 1 {
            return Err(RdpError::Framing {
                reason: "MCS data header truncated".to_string(),
            });
        }
        s.advance(1); // dataPriority + segmentation
        let length = per::read_length(s)?;

        if length > s.remaining() {
            return Err(RdpError::Framing {
                reason: format!(
                    "MCS payload length {length} exceeds {} remaining",
                    s.remaining()
                ),
            });
        }

        Ok(McsDataHeader {
            initiator,
            channel_id,
            length,
        })
    }

    /// Writes the Send-Data Indication header for a server-to-client payload
    /// of `payload_len` bytes on `channel_id`.
    pub fn write_data_indication_header(
        buf: &mut Vec<u8>,
        user_id: u16,
        channel_id: u16,
        payload_len: usize,
    ) {
        per::write_choice(buf, MCS_SEND_DATA_INDICATION << 2);
        per::write_integer16(buf, user_id, MCS_USER_CHANNEL_BASE);
        per::write_integer16(buf, channel_id, 0);
        buf.put_u8(0x70); // dataPriority: high, segmentation: begin | end
        per::write_length(buf, payload_len);
    }

    fn expect_choice(s: &mut Bytes, expected: u8) -> Result<(), RdpError> {
        let choice = per::read_choice(s)?;
        if choice >> 2 != expected {
            return Err(RdpError::Protocol {
                message: format!("expected MCS domain PDU {expected}, got choice {}", choice >> 2),
            });
        }
        Ok(())
    }

    fn write_domain_parameters(buf: &mut Vec<u8>) {
        let mut params = Vec::with_capacity(32);
        ber::write_integer(&mut params, 34); // maxChannelIds
        ber::write_integer(&mut params, 3); // maxUserIds
        ber::write_integer(&mut params, 0); // maxTokenIds
        ber::write_integer(&mut params, 1); // numPriorities
        ber::write_integer(&mut params, 0); // minThroughput
        ber::write_integer(&mut params, 1); // maxHeight
        ber::write_integer(&mut params, 65528); // maxMCSPDUsize
        ber::write_integer(&mut params, 2); // protocolVersion

        buf.put_u8(ber::TAG_SEQUENCE);
        ber::write_length(buf, params.len());
        buf.extend_from_slice(&params);
    }

    fn write_conference_create_response(requested_protocols: u32) -> Vec<u8> {
        let blocks = Self::write_server_data_blocks(requested_protocols);

        let mut pdu = Vec::with_capacity(blocks.len() + 24);
        per::write_choice(&mut pdu, 0x14); // conferenceCreateResponse, extensions absent
        per::write_integer16(&mut pdu, 0x79F3, MCS_USER_CHANNEL_BASE); // nodeID
        per::write_integer(&mut pdu, 1); // tag
        per::write_enumerated(&mut pdu, 0); // result: success
        per::write_number_of_sets(&mut pdu, 1);
        per::write_choice(&mut pdu, 0xC0); // userData key: h221NonStandard
        per::write_octet_string(&mut pdu, b"McDn", 4);
        per::write_length(&mut pdu, blocks.len());
        pdu.extend_from_slice(&blocks);

        let mut gcc = Vec::with_capacity(pdu.len() + 12);
        per::write_choice(&mut gcc, 0); // t124Identifier: object
        per::write_object(&mut gcc, &T124_02_98_OID);
        per::write_length(&mut gcc, pdu.len());
        gcc.extend_from_slice(&pdu);
        gcc
    }

    fn write_server_data_blocks(requested_protocols: u32) -> Vec<u8> {
        let mut blocks = Vec::with_capacity(32);

        blocks.put_u16_le(SC_CORE);
        blocks.put_u16_le(12);
        blocks.put_u32_le(RDP_VERSION_5_PLUS);
        blocks.put_u32_le(requested_protocols);

        blocks.put_u16_le(SC_SECURITY);
        blocks.put_u16_le(12);
        blocks.put_u32_le(0); // encryptionMethod: none
        blocks.put_u32_le(0); // encryptionLevel: none

        blocks.put_u16_le(SC_NET);
        blocks.put_u16_le(8);
        blocks.put_u16_le(MCS_GLOBAL_CHANNEL_ID);
        blocks.put_u16_le(0); // channelCount

        blocks
    }
}

#[cfg(test)]
mod tests {
    use super::super::tpkt::TpktCodec;
    use super::super::x224::X224Codec;
    use super::*;

    fn wrap_x224(body: &[u8]) -> Bytes {
        let mut buf = Vec::new();
        TpktCodec::write_header(&mut buf, (7 + body.len()) as u16);
        X224Codec::write_data_header(&mut buf);
        buf.extend_from_slice(body);
        Bytes::from(buf)
    }

    #[test]
    fn test_channel_join_roundtrip() {
        let mut request = Vec::new();
        per::write_choice(&mut request, MCS_CHANNEL_JOIN_REQUEST << 2);
        per::write_integer16(&mut request, 1002, MCS_USER_CHANNEL_BASE);
        per::write_integer16(&mut request, MCS_GLOBAL_CHANNEL_ID, 0);

        let mut s = Bytes::from(request);
        let (initiator, channel) = McsCodec::read_channel_join_request(&mut s).unwrap();
        assert_eq!(initiator, 1002);
        assert_eq!(channel, MCS_GLOBAL_CHANNEL_ID);

        let confirm = McsCodec::write_channel_join_confirm(1002, channel);
        assert_eq!(confirm[0], (MCS_CHANNEL_JOIN_CONFIRM << 2) | 2);
        assert_eq!(confirm[1], 0);
    }

    #[test]
    fn test_channel_bookkeeping_requires_both_channels() {
        let mut mcs = McsChannel::new();
        assert!(!mcs.all_joined());

        assert!(mcs.mark_joined(mcs.user_channel_id));
        assert!(!mcs.all_joined());

        assert!(!mcs.mark_joined(0x1234));
        assert!(mcs.mark_joined(MCS_GLOBAL_CHANNEL_ID));
        assert!(mcs.all_joined());
    }

    #[test]
    fn test_data_header_parses_send_data_request() {
        let mut body = Vec::new();
        per::write_choice(&mut body, MCS_SEND_DATA_REQUEST << 2);
        per::write_integer16(&mut body, 1002, MCS_USER_CHANNEL_BASE);
        per::write_integer16(&mut body, MCS_GLOBAL_CHANNEL_ID, 0);
        body.put_u8(0x70);
        per::write_length(&mut body, 4);
        body.extend_from_slice(&[1, 2, 3, 4]);

        let mut s = wrap_x224(&body);
        let header = McsCodec::read_data_header(&mut s).unwrap();

        assert_eq!(header.initiator, 1002);
        assert_eq!(header.channel_id, MCS_GLOBAL_CHANNEL_ID);
        assert_eq!(header.length, 4);
        assert_eq!(s.remaining(), 4);
    }

    #[test]
    fn test_data_header_maps_ultimatum_to_disconnect() {
        let mut s = wrap_x224(&McsCodec::write_disconnect_provider_ultimatum());
        assert!(matches!(
            McsCodec::read_data_header(&mut s),
            Err(RdpError::Disconnected)
        ));
    }

    #[test]
    fn test_data_header_rejects_overlong_payload_length() {
        let mut body = Vec::new();
        per::write_choice(&mut body, MCS_SEND_DATA_REQUEST << 2);
        per::write_integer16(&mut body, 1002, MCS_USER_CHANNEL_BASE);
        per::write_integer16(&mut body, MCS_GLOBAL_CHANNEL_ID, 0);
        body.put_u8(0x70);
        per::write_length(&mut body, 64);

        let mut s = wrap_x224(&body);
        assert!(matches!(
            McsCodec::read_data_header(&mut s),
            Err(RdpError::Framing { .. })
        ));
    }

    #[test]
    fn test_connect_initial_structure_parses() {
        let mut inner = Vec::new();
        ber::write_octet_string(&mut inner, &[1]);
        ber::write_octet_string(&mut inner, &[1]);
        inner.extend_from_slice(&[ber::TAG_BOOLEAN, 1, 0xFF]);
        for _ in 0..3 {
            inner.put_u8(ber::TAG_SEQUENCE);
            ber::write_length(&mut inner, 2);
            inner.extend_from_slice(&[0, 0]);
        }
        ber::write_octet_string(&mut inner, b"gcc-request");

        let mut body = Vec::new();
        ber::write_application_tag(&mut body, 101, inner.len());
        body.extend_from_slice(&inner);

        let mut s = Bytes::from(body);
        McsCodec::read_connect_initial(&mut s).unwrap();
        assert_eq!(s.remaining(), 0);
    }

    #[test]
    fn test_connect_response_carries_server_blocks() {
        let body = McsCodec::write_connect_response(0);

        // BER application tag 102 leads the response.
        assert_eq!(&body[..2], &[0x7F, MCS_TYPE_CONNECT_RESPONSE]);
        // The GCC payload advertises the global channel in the SC_NET block.
        let net_block = [
            (SC_NET & 0xFF) as u8,
            (SC_NET >> 8) as u8,
            8,
            0,
            (MCS_GLOBAL_CHANNEL_ID & 0xFF) as u8,
            (MCS_GLOBAL_CHANNEL_ID >> 8) as u8,
        ];
        assert!(body.windows(net_block.len()).any(|w| w == net_block));
    }
}
