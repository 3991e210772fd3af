//! Per-session negotiated settings

use crate::config::ProtocolConfig;

/// Everything the engine negotiates or learns about one client session.
///
/// Constructed from the protocol defaults; the handshake acceptors overwrite
/// fields as the client commits to concrete values.
#[derive(Debug, Clone)]
pub struct Settings {
    /// True once the peer has been initialized for the server role. Never
    /// flips back.
    pub server_mode: bool,
    /// Source id of the most recent share-control PDU received.
    pub pdu_source: u16,
    /// Security protocols the client requested during X.224 negotiation.
    pub requested_protocols: u32,
    /// Protocol the server selected in the negotiation response.
    pub selected_protocol: u32,
    /// Share id the server handed out in Demand-Active.
    pub share_id: u32,
    /// Whether PDU-level encryption was negotiated. This engine never
    /// negotiates it; security is expected from the transport layer.
    pub encryption: bool,
    /// Domain from the client info packet.
    pub client_domain: Option<String>,
    /// Username from the client info packet.
    pub client_username: Option<String>,
    /// Desktop width in pixels, updated from the client's Confirm-Active.
    pub desktop_width: u16,
    /// Desktop height in pixels, updated from the client's Confirm-Active.
    pub desktop_height: u16,
    /// Color depth in bits per pixel.
    pub color_depth: u16,
    /// Operating system class advertised in the general capability set.
    pub os_major_type: u16,
    pub os_minor_type: u16,
    /// MCS channels the client joined, in join order.
    pub joined_channels: Vec<u16>,
}

impl Settings {
    pub fn new(config: &ProtocolConfig) -> Self {
        Self {
            server_mode: false,
            pdu_source: 0,
            requested_protocols: 0,
            selected_protocol: 0,
            // High word is a per-session nonce; the low word mirrors the
            // originator id clients echo back.
            share_id: (u32::from(rand::random::<u16>()) << 16) | 0x03EA,
            encryption: false,
            client_domain: None,
            client_username: None,
            desktop_width: config.desktop_width,
            desktop_height: config.desktop_height,
            color_depth: config.color_depth,
            os_major_type: config.os_major_type,
            os_minor_type: config.os_minor_type,
            joined_channels: Vec::new(),
        }
    }
}
