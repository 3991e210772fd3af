//! Client-side byte builders and shared fixtures
//!
//! Everything here produces the frames a conforming RDP client would send,
//! layered the same way the engine's codecs expect them: TPKT, X.224, MCS,
//! then the share headers.

use std::sync::{Arc, Mutex};

use bytes::{BufMut, Bytes};
use quayside_core::rdp::protocol::client_info::{INFO_UNICODE, SEC_INFO_PKT, write_security_header};
use quayside_core::rdp::protocol::share::{
    ControlPdu, ControlPduType, DataPduType, ShareControlHeader, ShareDataHeader, SynchronizePdu,
};
use quayside_core::rdp::protocol::tpkt::TpktCodec;
use quayside_core::rdp::protocol::{ber, per};
use quayside_core::rdp::test_support::{ScriptedTransport, ScriptedTransportHandle};
use quayside_core::rdp::{MCS_GLOBAL_CHANNEL_ID, RdpError};
use quayside_core::{PeerContext, PeerHandler, QuaysideConfig, RdpPeer};

/// User id the server hands out to the first attached client.
pub const CLIENT_USER_ID: u16 = 1002;

fn wrap_tpkt(body: &[u8]) -> Bytes {
    let mut frame = Vec::with_capacity(body.len() + 4);
    TpktCodec::write_header(&mut frame, (body.len() + 4) as u16);
    frame.extend_from_slice(body);
    Bytes::from(frame)
}

fn wrap_x224(body: &[u8]) -> Bytes {
    let mut frame = Vec::with_capacity(body.len() + 7);
    TpktCodec::write_header(&mut frame, (body.len() + 7) as u16);
    frame.extend_from_slice(&[2, 0xF0, 0x80]);
    frame.extend_from_slice(body);
    Bytes::from(frame)
}

/// Wraps `payload` in a Send-Data Request on the given channel.
pub fn send_data_request(channel_id: u16, payload: &[u8]) -> Bytes {
    let mut body = Vec::with_capacity(payload.len() + 10);
    per::write_choice(&mut body, 25 << 2);
    per::write_integer16(&mut body, CLIENT_USER_ID, 1001);
    per::write_integer16(&mut body, channel_id, 0);
    body.put_u8(0x70);
    per::write_length(&mut body, payload.len());
    body.extend_from_slice(payload);
    wrap_x224(&body)
}

/// X.224 connection request with a cookie and an RDP negotiation request.
pub fn connection_request() -> Bytes {
    let cookie = b"Cookie: mstshash=tester\r\n";

    let mut body = Vec::new();
    body.put_u8((6 + cookie.len() + 8) as u8);
    body.put_u8(0xE0);
    body.put_u16(0);
    body.put_u16(1);
    body.put_u8(0);
    body.extend_from_slice(cookie);
    body.put_u8(0x01); // RDP_NEG_REQ
    body.put_u8(0);
    body.put_u16_le(8);
    body.put_u32_le(0); // standard RDP security
    wrap_tpkt(&body)
}

/// MCS Connect-Initial with an opaque GCC payload.
pub fn mcs_connect_initial() -> Bytes {
    let mut inner = Vec::new();
    ber::write_octet_string(&mut inner, &[1]); // callingDomainSelector
    ber::write_octet_string(&mut inner, &[1]); // calledDomainSelector
    inner.extend_from_slice(&[ber::TAG_BOOLEAN, 1, 0xFF]); // upwardFlag
    for _ in 0..3 {
        inner.put_u8(ber::TAG_SEQUENCE);
        ber::write_length(&mut inner, 2);
        inner.extend_from_slice(&[0x02, 0x22]);
    }
    ber::write_octet_string(&mut inner, b"gcc-conference-create-request");

    let mut body = Vec::new();
    ber::write_application_tag(&mut body, 101, inner.len());
    body.extend_from_slice(&inner);
    wrap_x224(&body)
}

pub fn erect_domain() -> Bytes {
    let mut body = Vec::new();
    per::write_choice(&mut body, 1 << 2);
    per::write_integer(&mut body, 0);
    per::write_integer(&mut body, 0);
    wrap_x224(&body)
}

pub fn attach_user() -> Bytes {
    let mut body = Vec::new();
    per::write_choice(&mut body, 10 << 2);
    wrap_x224(&body)
}

pub fn channel_join(channel_id: u16) -> Bytes {
    let mut body = Vec::new();
    per::write_choice(&mut body, 14 << 2);
    per::write_integer16(&mut body, CLIENT_USER_ID, 1001);
    per::write_integer16(&mut body, channel_id, 0);
    wrap_x224(&body)
}

/// Client info packet carrying a unicode identity.
pub fn client_info(domain: &str, username: &str) -> Bytes {
    fn utf16(text: &str) -> Vec<u8> {
        text.encode_utf16().flat_map(u16::to_le_bytes).collect()
    }

    let domain = utf16(domain);
    let username = utf16(username);
    let password = utf16("secret");

    let mut info = Vec::new();
    info.put_u32_le(0); // codePage
    info.put_u32_le(INFO_UNICODE);
    info.put_u16_le(domain.len() as u16);
    info.put_u16_le(username.len() as u16);
    info.put_u16_le(password.len() as u16);
    info.put_u16_le(0);
    info.put_u16_le(0);
    for field in [&domain, &username, &password] {
        info.extend_from_slice(field);
        info.put_u16_le(0);
    }
    info.put_u16_le(0); // alternate shell terminator
    info.put_u16_le(0); // working dir terminator

    let mut payload = Vec::new();
    write_security_header(&mut payload, SEC_INFO_PKT);
    payload.extend_from_slice(&info);
    send_data_request(MCS_GLOBAL_CHANNEL_ID, &payload)
}

/// Confirm-Active echoing the server's share id and committing a desktop
/// geometry through the bitmap capability set.
pub fn confirm_active(share_id: u32, width: u16, height: u16) -> Bytes {
    let mut caps = Vec::new();
    caps.put_u16_le(2); // bitmap capability set
    caps.put_u16_le(28);
    caps.put_u16_le(32);
    caps.put_u16_le(1);
    caps.put_u16_le(1);
    caps.put_u16_le(1);
    caps.put_u16_le(width);
    caps.put_u16_le(height);
    caps.extend_from_slice(&[0u8; 12]);

    let mut body = Vec::new();
    body.put_u32_le(share_id);
    body.put_u16_le(0x03EA); // originatorId
    body.put_u16_le(4);
    body.put_u16_le((caps.len() + 4) as u16);
    body.extend_from_slice(b"MSTC");
    body.put_u16_le(1);
    body.put_u16_le(0);
    body.extend_from_slice(&caps);

    let mut pdu = Vec::new();
    ShareControlHeader::write(
        &mut pdu,
        ControlPduType::ConfirmActive,
        CLIENT_USER_ID,
        (6 + body.len()) as u16,
    );
    pdu.extend_from_slice(&body);
    send_data_request(MCS_GLOBAL_CHANNEL_ID, &pdu)
}

/// Share-data PDU of the given subtype on the global channel.
pub fn share_data(share_id: u32, pdu_type: DataPduType, body: &[u8]) -> Bytes {
    let mut pdu = Vec::new();
    ShareControlHeader::write(
        &mut pdu,
        ControlPduType::Data,
        CLIENT_USER_ID,
        (18 + body.len()) as u16,
    );
    ShareDataHeader::write(&mut pdu, share_id, pdu_type, body.len());
    pdu.extend_from_slice(body);
    send_data_request(MCS_GLOBAL_CHANNEL_ID, &pdu)
}

pub fn synchronize_body() -> Vec<u8> {
    let mut body = Vec::new();
    SynchronizePdu::write(&mut body, CLIENT_USER_ID);
    body
}

pub fn control_body(action: u16) -> Vec<u8> {
    let mut body = Vec::new();
    ControlPdu::write(&mut body, action, 0, 0);
    body
}

pub fn font_list_body() -> Vec<u8> {
    let mut body = Vec::new();
    body.put_u16_le(0);
    body.put_u16_le(0);
    body.put_u16_le(0x0003);
    body.put_u16_le(0x0032);
    body
}

/// Fast-path mouse move carrying one event.
pub fn fastpath_mouse(x: u16, y: u16) -> Bytes {
    let mut frame = Vec::new();
    frame.put_u8(0x04); // one event, no encryption
    frame.put_u8(9); // total length
    frame.put_u8(1 << 5); // mouse event
    frame.put_u16_le(0x0800);
    frame.put_u16_le(x);
    frame.put_u16_le(y);
    Bytes::from(frame)
}

/// Records the lifecycle hooks in invocation order.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<&'static str>>>);

impl EventLog {
    pub fn events(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| **e == event).count()
    }

    fn push(&self, event: &'static str) {
        self.0.lock().unwrap().push(event);
    }
}

pub struct TestHandler {
    log: EventLog,
    pub post_connect_ok: bool,
    pub activate_ok: bool,
}

impl TestHandler {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            post_connect_ok: true,
            activate_ok: true,
        }
    }
}

impl PeerHandler for TestHandler {
    fn context_new(&mut self, _context: &mut PeerContext) {
        self.log.push("context_new");
    }

    fn context_free(&mut self, _context: &mut PeerContext) {
        self.log.push("context_free");
    }

    fn post_connect(&mut self, _context: &mut PeerContext) -> bool {
        self.log.push("post_connect");
        self.post_connect_ok
    }

    fn activate(&mut self, _context: &mut PeerContext) -> bool {
        self.log.push("activate");
        self.activate_ok
    }
}

/// Builds a peer over a scripted transport with a recording handler.
pub fn scripted_peer(handler: TestHandler) -> (RdpPeer, ScriptedTransportHandle) {
    let (transport, handle) = ScriptedTransport::new();
    let peer = RdpPeer::with_transport(
        Box::new(transport),
        QuaysideConfig::default(),
        Box::new(handler),
    );
    (peer, handle)
}

/// Pushes one frame and runs the receive path over it.
pub async fn drive(
    peer: &mut RdpPeer,
    handle: &ScriptedTransportHandle,
    frame: Bytes,
) -> Result<(), RdpError> {
    handle.push_frame(frame);
    peer.check_fds().await
}

/// Runs the complete handshake up to the active state, leaving the font
/// list (and therefore the lifecycle hooks) to the caller.
pub async fn handshake_to_active(peer: &mut RdpPeer, handle: &ScriptedTransportHandle) {
    peer.context_new().unwrap();
    peer.initialize().unwrap();

    drive(peer, handle, connection_request()).await.unwrap();
    drive(peer, handle, mcs_connect_initial()).await.unwrap();
    drive(peer, handle, erect_domain()).await.unwrap();
    drive(peer, handle, attach_user()).await.unwrap();
    drive(peer, handle, channel_join(CLIENT_USER_ID)).await.unwrap();
    drive(peer, handle, channel_join(MCS_GLOBAL_CHANNEL_ID))
        .await
        .unwrap();
    drive(peer, handle, client_info("CORP", "alice")).await.unwrap();

    let share_id = peer.context().unwrap().settings().share_id;
    drive(peer, handle, confirm_active(share_id, 1280, 720))
        .await
        .unwrap();
}

/// Runs the handshake and the post-activation finishing sequence so the
/// hooks fire.
pub async fn activate_session(peer: &mut RdpPeer, handle: &ScriptedTransportHandle) {
    handshake_to_active(peer, handle).await;
    let share_id = peer.context().unwrap().settings().share_id;

    drive(
        peer,
        handle,
        share_data(share_id, DataPduType::Synchronize, &synchronize_body()),
    )
    .await
    .unwrap();
    drive(
        peer,
        handle,
        share_data(share_id, DataPduType::Control, &control_body(0x0004)),
    )
    .await
    .unwrap();
    drive(
        peer,
        handle,
        share_data(share_id, DataPduType::Control, &control_body(0x0001)),
    )
    .await
    .unwrap();
    drive(
        peer,
        handle,
        share_data(share_id, DataPduType::FontList, &font_list_body()),
    )
    .await
    .unwrap();
}
