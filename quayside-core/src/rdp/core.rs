//! RDP core: connection-phase acceptors and server-side PDU emission
//!
//! Each acceptor consumes one complete inbound frame for its phase, emits
//! whatever response the sub-protocol requires, and advances the connection
//! state. The peer's receive path owns the dispatch; nothing here runs
//! outside the state the table in the peer module assigns it.

use bytes::Bytes;
use tracing::{debug, trace};

use super::fastpath::Fastpath;
use super::input::Input;
use super::license::{self, LicenseState};
use super::protocol::capability;
use super::protocol::client_info::{ClientInfo, SEC_INFO_PKT, read_security_header};
use super::protocol::mcs::{MCS_GLOBAL_CHANNEL_ID, McsChannel, McsCodec};
use super::protocol::share::{
    CTRLACTION_COOPERATE, CTRLACTION_GRANTED_CONTROL, CTRLACTION_REQUEST_CONTROL, ControlPdu,
    ControlPduType, DataPduType, FontListPdu, SHARE_CONTROL_HEADER_LENGTH,
    SHARE_DATA_HEADER_LENGTH, ShareControlHeader, ShareDataHeader, SynchronizePdu,
};
use super::protocol::tpkt::TpktCodec;
use super::protocol::x224::{PROTOCOL_RDP, X224Codec};
use super::settings::Settings;
use super::state::ConnectionState;
use super::transport::FrameTransport;
use super::update::Update;
use crate::config::QuaysideConfig;
use crate::rdp::RdpError;

/// Control id the server reports when granting control.
const SERVER_CONTROL_ID: u32 = 0x03EA;

/// Protocol state and sub-systems for one server-side session.
///
/// Owned exclusively by the peer's context; dropping the peer cascades to
/// the transport, MCS bookkeeping, fast-path state, and settings.
pub struct RdpCore {
    pub(crate) state: ConnectionState,
    pub(crate) settings: Settings,
    pub(crate) transport: Box<dyn FrameTransport>,
    pub(crate) mcs: McsChannel,
    pub(crate) fastpath: Fastpath,
    pub(crate) update: Update,
    pub(crate) input: Input,
    pub(crate) license: LicenseState,
}

impl RdpCore {
    pub(crate) fn new(transport: Box<dyn FrameTransport>, config: &QuaysideConfig) -> Self {
        Self {
            state: ConnectionState::Initial,
            settings: Settings::new(&config.protocol),
            transport,
            mcs: McsChannel::new(),
            fastpath: Fastpath::new(),
            update: Update::new(),
            input: Input::new(),
            license: LicenseState::default(),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    /// INITIAL: answer the X.224 connection request.
    pub(crate) fn accept_nego(&mut self, s: &mut Bytes) -> Result<(), RdpError> {
        TpktCodec::read_header(s)?;
        let request = X224Codec::read_connection_request(s)?;

        self.settings.requested_protocols = request.requested_protocols;
        self.settings.selected_protocol = PROTOCOL_RDP;

        let confirm = X224Codec::write_connection_confirm(PROTOCOL_RDP);
        self.transport.send(&confirm)?;

        self.state = ConnectionState::Nego;
        debug!(
            requested = request.requested_protocols,
            cookie = request.cookie.as_deref().unwrap_or(""),
            "answered X.224 negotiation"
        );
        Ok(())
    }

    /// NEGO: answer MCS Connect-Initial with the server's Connect-Response.
    pub(crate) fn accept_mcs_connect_initial(&mut self, s: &mut Bytes) -> Result<(), RdpError> {
        TpktCodec::read_header(s)?;
        X224Codec::read_data_header(s)?;
        McsCodec::read_connect_initial(s)?;

        let response = McsCodec::write_connect_response(self.settings.requested_protocols);
        self.send_x224(&response)?;

        self.state = ConnectionState::McsConnect;
        Ok(())
    }

    /// MCS_CONNECT: consume Erect-Domain; no response is defined.
    pub(crate) fn accept_mcs_erect_domain(&mut self, s: &mut Bytes) -> Result<(), RdpError> {
        TpktCodec::read_header(s)?;
        X224Codec::read_data_header(s)?;
        McsCodec::read_erect_domain_request(s)?;

        self.state = ConnectionState::McsErectDomain;
        Ok(())
    }

    /// MCS_ERECT_DOMAIN: answer Attach-User with the assigned user id.
    pub(crate) fn accept_mcs_attach_user(&mut self, s: &mut Bytes) -> Result<(), RdpError> {
        TpktCodec::read_header(s)?;
        X224Codec::read_data_header(s)?;
        McsCodec::read_attach_user_request(s)?;

        let confirm = McsCodec::write_attach_user_confirm(self.mcs.user_channel_id);
        self.send_x224(&confirm)?;

        self.state = ConnectionState::McsAttachUser;
        Ok(())
    }

    /// MCS_ATTACH_USER: grant channel joins until the user and global
    /// channels are both joined.
    pub(crate) fn accept_mcs_channel_join(&mut self, s: &mut Bytes) -> Result<(), RdpError> {
        TpktCodec::read_header(s)?;
        X224Codec::read_data_header(s)?;
        let (initiator, channel_id) = McsCodec::read_channel_join_request(s)?;

        let confirm = McsCodec::write_channel_join_confirm(self.mcs.user_channel_id, channel_id);
        self.send_x224(&confirm)?;

        if !self.mcs.mark_joined(channel_id) {
            trace!(initiator, channel_id, "join granted for auxiliary channel");
        }
        self.settings.joined_channels.push(channel_id);

        if self.mcs.all_joined() {
            self.state = ConnectionState::McsChannelJoin;
        }
        Ok(())
    }

    /// MCS_CHANNEL_JOIN: consume the client info packet, short-circuit
    /// licensing, and demand activation.
    pub(crate) fn accept_client_info(&mut self, s: &mut Bytes) -> Result<(), RdpError> {
        let header = McsCodec::read_data_header(s)?;
        if header.channel_id != MCS_GLOBAL_CHANNEL_ID {
            return Err(RdpError::Protocol {
                message: format!("client info on channel {}", header.channel_id),
            });
        }

        let flags = read_security_header(s)?;
        if flags & SEC_INFO_PKT == 0 {
            return Err(RdpError::Protocol {
                message: format!("expected client info packet, security flags {flags:#06x}"),
            });
        }

        let info = ClientInfo::read(s)?;
        debug!(
            username = %info.username,
            domain = %info.domain,
            "client info received"
        );
        self.settings.client_domain = (!info.domain.is_empty()).then_some(info.domain);
        self.settings.client_username = (!info.username.is_empty()).then_some(info.username);

        self.send_on_global(&license::write_valid_client_packet())?;
        self.license = LicenseState::Completed;

        self.send_demand_active()?;
        self.state = ConnectionState::License;
        Ok(())
    }

    /// LICENSE: consume Confirm-Active and enter the active phase.
    pub(crate) fn accept_confirm_active(&mut self, s: &mut Bytes) -> Result<(), RdpError> {
        let header = McsCodec::read_data_header(s)?;
        if header.channel_id != MCS_GLOBAL_CHANNEL_ID {
            return Err(RdpError::Protocol {
                message: format!("confirm-active on channel {}", header.channel_id),
            });
        }

        let control = ShareControlHeader::read(s)?;
        self.settings.pdu_source = control.pdu_source;
        if control.pdu_type != ControlPduType::ConfirmActive {
            return Err(RdpError::UnexpectedPdu {
                pdu: control.pdu_type.to_string(),
                state: self.state,
            });
        }

        let caps = capability::read_confirm_active(s)?;
        if caps.desktop_width != 0 && caps.desktop_height != 0 {
            self.settings.desktop_width = caps.desktop_width;
            self.settings.desktop_height = caps.desktop_height;
        }
        if caps.color_depth != 0 {
            self.settings.color_depth = caps.color_depth;
        }

        self.state = ConnectionState::Active;
        debug!(
            width = self.settings.desktop_width,
            height = self.settings.desktop_height,
            depth = self.settings.color_depth,
            "session activated"
        );
        Ok(())
    }

    /// Consumes a client synchronize PDU and mirrors it back.
    pub(crate) fn recv_client_synchronize(&mut self, s: &mut Bytes) -> Result<(), RdpError> {
        SynchronizePdu::read(s)?;

        let mut body = Vec::with_capacity(4);
        SynchronizePdu::write(&mut body, self.mcs.user_channel_id);
        self.send_share_data(DataPduType::Synchronize, &body)
    }

    /// Handles a client control PDU: acknowledges cooperation and grants
    /// control when requested.
    pub(crate) fn accept_client_control(&mut self, s: &mut Bytes) -> Result<(), RdpError> {
        let pdu = ControlPdu::read(s)?;
        match pdu.action {
            CTRLACTION_COOPERATE => self.send_control(CTRLACTION_COOPERATE, 0, 0),
            CTRLACTION_REQUEST_CONTROL => self.send_control(
                CTRLACTION_GRANTED_CONTROL,
                self.settings.pdu_source,
                SERVER_CONTROL_ID,
            ),
            action => {
                trace!(action, "ignoring control action");
                Ok(())
            }
        }
    }

    /// Handles the client font list and answers with the font map, the PDU
    /// that completes (re)activation on the client side.
    pub(crate) fn accept_client_font_list(&mut self, s: &mut Bytes) -> Result<(), RdpError> {
        FontListPdu::read(s)?;

        let mut body = Vec::with_capacity(8);
        super::protocol::share::FontMapPdu::write(&mut body);
        self.send_share_data(DataPduType::FontMap, &body)
    }

    /// Sends the MCS Disconnect-Provider Ultimatum that acknowledges a
    /// client shutdown request.
    pub(crate) fn send_disconnect_ultimatum(&mut self) -> Result<(), RdpError> {
        self.send_x224(&McsCodec::write_disconnect_provider_ultimatum())
    }

    /// Starts a reactivation sequence: Deactivate-All followed by a fresh
    /// Demand-Active, rewinding the state so Confirm-Active is expected
    /// again.
    pub(crate) fn reactivate(&mut self) -> Result<(), RdpError> {
        if !self.state.is_active() {
            return Err(RdpError::Protocol {
                message: format!("reactivation requires an active session, state is {}", self.state),
            });
        }

        let deactivate = capability::write_deactivate_all(self.settings.share_id);
        self.send_share_control(ControlPduType::DeactivateAll, &deactivate)?;
        self.send_demand_active()?;

        self.state = ConnectionState::License;
        debug!("reactivation sequence started");
        Ok(())
    }

    pub(crate) fn disconnect(&mut self) {
        self.transport.disconnect();
    }

    fn send_demand_active(&mut self) -> Result<(), RdpError> {
        let body = capability::write_demand_active(&self.settings);
        self.send_share_control(ControlPduType::DemandActive, &body)
    }

    fn send_control(&mut self, action: u16, grant_id: u16, control_id: u32) -> Result<(), RdpError> {
        let mut body = Vec::with_capacity(8);
        ControlPdu::write(&mut body, action, grant_id, control_id);
        self.send_share_data(DataPduType::Control, &body)
    }

    /// Wraps `body` in TPKT and X.224 data framing and hands it to the
    /// transport.
    fn send_x224(&mut self, body: &[u8]) -> Result<(), RdpError> {
        let mut frame = Vec::with_capacity(body.len() + 7);
        TpktCodec::write_header(&mut frame, (body.len() + 7) as u16);
        X224Codec::write_data_header(&mut frame);
        frame.extend_from_slice(body);
        self.transport.send(&frame)
    }

    /// Sends `payload` on the global channel inside a Send-Data Indication.
    fn send_on_global(&mut self, payload: &[u8]) -> Result<(), RdpError> {
        let mut body = Vec::with_capacity(payload.len() + 10);
        McsCodec::write_data_indication_header(
            &mut body,
            self.mcs.user_channel_id,
            MCS_GLOBAL_CHANNEL_ID,
            payload.len(),
        );
        body.extend_from_slice(payload);
        self.send_x224(&body)
    }

    fn send_share_control(
        &mut self,
        pdu_type: ControlPduType,
        body: &[u8],
    ) -> Result<(), RdpError> {
        let total = SHARE_CONTROL_HEADER_LENGTH + body.len();
        let mut payload = Vec::with_capacity(total);
        ShareControlHeader::write(&mut payload, pdu_type, self.mcs.user_channel_id, total as u16);
        payload.extend_from_slice(body);
        self.send_on_global(&payload)
    }

    fn send_share_data(&mut self, pdu_type: DataPduType, body: &[u8]) -> Result<(), RdpError> {
        let total = SHARE_CONTROL_HEADER_LENGTH + SHARE_DATA_HEADER_LENGTH + body.len();
        let mut payload = Vec::with_capacity(total);
        ShareControlHeader::write(
            &mut payload,
            ControlPduType::Data,
            self.mcs.user_channel_id,
            total as u16,
        );
        ShareDataHeader::write(&mut payload, self.settings.share_id, pdu_type, body.len());
        payload.extend_from_slice(body);
        self.send_on_global(&payload)
    }
}
