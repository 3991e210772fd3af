//! Server peer: lifecycle, readiness surface, and active-phase dispatch
//!
//! An `RdpPeer` owns one inbound client session end to end: it binds the
//! session context, drives the connection handshake on every delivered
//! stream, and demultiplexes active-phase PDUs. The embedder participates
//! through [`PeerHandler`] hooks at defined lifecycle moments.

use std::os::fd::{AsRawFd, RawFd};

use bytes::{Buf, Bytes};
use tokio::net::TcpStream;
use tracing::{debug, error, trace, warn};

use super::core::RdpCore;
use super::fastpath::FASTPATH_INPUT_ENCRYPTED;
use super::input::Input;
use super::license::LicenseState;
use super::protocol::mcs::{MCS_GLOBAL_CHANNEL_ID, McsCodec};
use super::protocol::share::{ControlPduType, DataPduType, ShareControlHeader, ShareDataHeader};
use super::protocol::tpkt::TpktCodec;
use super::settings::Settings;
use super::state::ConnectionState;
use super::transport::{FrameTransport, TcpTransport};
use super::update::Update;
use crate::config::QuaysideConfig;
use crate::rdp::RdpError;

/// Embedder lifecycle hooks for one peer.
///
/// Every method has a no-op default, so an embedder implements only the
/// moments it cares about; an unimplemented hook behaves as if it were
/// absent. Embedder state lives inside the implementing type and is
/// reachable from every hook.
pub trait PeerHandler: Send {
    /// The session context has been constructed and wired.
    fn context_new(&mut self, _context: &mut PeerContext) {}

    /// The context is about to be released.
    fn context_free(&mut self, _context: &mut PeerContext) {}

    /// First activation completed. Runs at most once per peer, never during
    /// reactivation. Returning false terminates the session.
    fn post_connect(&mut self, _context: &mut PeerContext) -> bool {
        true
    }

    /// The session entered the active phase; runs on the initial activation
    /// and on every reactivation. Returning false terminates the session.
    fn activate(&mut self, _context: &mut PeerContext) -> bool {
        true
    }
}

/// Session context owned by a peer: the RDP core and the borrowed views it
/// exposes to the embedder.
pub struct PeerContext {
    pub(crate) rdp: RdpCore,
}

impl PeerContext {
    /// Current connection phase.
    pub fn state(&self) -> ConnectionState {
        self.rdp.state()
    }

    /// Negotiated session settings.
    pub fn settings(&self) -> &Settings {
        &self.rdp.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.rdp.settings
    }

    /// Where the licensing exchange stands.
    pub fn license_state(&self) -> LicenseState {
        self.rdp.license
    }

    /// Server-to-client update seam.
    pub fn update(&mut self) -> &mut Update {
        &mut self.rdp.update
    }

    /// Client input dispatch point.
    pub fn input(&mut self) -> &mut Input {
        &mut self.rdp.input
    }
}

enum PendingTransport {
    Stream(TcpStream),
    Custom(Box<dyn FrameTransport>),
}

/// One inbound client session.
pub struct RdpPeer {
    sockfd: Option<RawFd>,
    pending: Option<PendingTransport>,
    context: Option<PeerContext>,
    handler: Box<dyn PeerHandler>,
    config: QuaysideConfig,
    post_connect_done: bool,
    context_freed: bool,
}

impl RdpPeer {
    /// Wraps an accepted socket. No I/O happens until the context is bound
    /// and the readiness loop starts calling [`check_fds`](Self::check_fds).
    pub fn new(stream: TcpStream, config: QuaysideConfig, handler: Box<dyn PeerHandler>) -> Self {
        Self {
            sockfd: Some(stream.as_raw_fd()),
            pending: Some(PendingTransport::Stream(stream)),
            context: None,
            handler,
            config,
            post_connect_done: false,
            context_freed: false,
        }
    }

    /// Same as [`new`](Self::new) with a caller-supplied transport, for TLS
    /// wrapping or tests.
    pub fn with_transport(
        transport: Box<dyn FrameTransport>,
        config: QuaysideConfig,
        handler: Box<dyn PeerHandler>,
    ) -> Self {
        Self {
            sockfd: transport.file_descriptor(),
            pending: Some(PendingTransport::Custom(transport)),
            context: None,
            handler,
            config,
            post_connect_done: false,
            context_freed: false,
        }
    }

    /// Builds the session context: constructs the RDP core, registers the
    /// server-side update callbacks, attaches the transport to the socket,
    /// and invokes the embedder's `context_new` hook.
    ///
    /// # Errors
    ///
    /// - `RdpError::NotConnected` - No socket or transport to attach
    pub fn context_new(&mut self) -> Result<(), RdpError> {
        if self.context.is_some() {
            return Ok(());
        }

        let transport: Box<dyn FrameTransport> = match self.pending.take() {
            Some(PendingTransport::Stream(stream)) => {
                Box::new(TcpTransport::attach(stream, &self.config.network))
            }
            Some(PendingTransport::Custom(transport)) => transport,
            None => return Err(RdpError::NotConnected),
        };

        let mut core = RdpCore::new(transport, &self.config);
        core.update.register_server_callbacks();
        self.context = Some(PeerContext { rdp: core });

        let context = self
            .context
            .as_mut()
            .ok_or(RdpError::NotConnected)?;
        self.handler.context_new(context);
        Ok(())
    }

    /// Invokes the embedder's `context_free` hook, at most once. Resource
    /// release itself happens when the peer is dropped.
    pub fn context_free(&mut self) {
        if self.context_freed {
            return;
        }
        self.context_freed = true;

        if let Some(context) = self.context.as_mut() {
            self.handler.context_free(context);
        }
    }

    /// Puts the session into server mode at the initial connection state.
    /// Call once after [`context_new`](Self::context_new), before entering
    /// the readiness loop.
    ///
    /// # Errors
    ///
    /// - `RdpError::NotConnected` - Context not bound yet
    pub fn initialize(&mut self) -> Result<(), RdpError> {
        let core = self.core_mut()?;
        core.settings.server_mode = true;
        core.state = ConnectionState::Initial;
        Ok(())
    }

    /// Raw descriptor for the embedder's readiness multiplexer.
    pub fn file_descriptor(&self) -> Option<RawFd> {
        match &self.context {
            Some(context) => context.rdp.transport.file_descriptor(),
            None => self.sockfd,
        }
    }

    /// Drives the transport and dispatches every complete inbound stream in
    /// arrival order. Returns when the socket would block.
    ///
    /// Any error is fatal to the session: the embedder reacts by calling
    /// [`disconnect`](Self::disconnect) or dropping the peer.
    ///
    /// # Errors
    ///
    /// - `RdpError::Disconnected` - Remote close
    /// - `RdpError::ShutdownRequested` - Clean client-requested shutdown
    /// - Framing, state, sub-protocol, callback, and I/O failures as
    ///   described in the error type
    pub async fn check_fds(&mut self) -> Result<(), RdpError> {
        let frames = self.core_mut()?.transport.check_fds().await?;
        for frame in frames {
            self.receive(frame)?;
        }
        Ok(())
    }

    /// Tears down the transport connection. Safe to call at any lifecycle
    /// point, any number of times.
    pub fn disconnect(&mut self) {
        self.pending = None;
        if let Some(context) = self.context.as_mut() {
            context.rdp.disconnect();
        }
    }

    /// Starts a server-initiated reactivation: the client re-confirms the
    /// capability set and replays its font list without re-negotiating the
    /// session. The `activate` hook fires again when the sequence completes;
    /// `post_connect` does not.
    ///
    /// # Errors
    ///
    /// - `RdpError::NotConnected` - Context not bound
    /// - `RdpError::Protocol` - Session is not active
    pub fn reactivate(&mut self) -> Result<(), RdpError> {
        self.core_mut()?.reactivate()
    }

    /// Session context, once bound.
    pub fn context(&self) -> Option<&PeerContext> {
        self.context.as_ref()
    }

    pub fn context_mut(&mut self) -> Option<&mut PeerContext> {
        self.context.as_mut()
    }

    fn core_mut(&mut self) -> Result<&mut RdpCore, RdpError> {
        self.context
            .as_mut()
            .map(|context| &mut context.rdp)
            .ok_or(RdpError::NotConnected)
    }

    /// Dispatches one complete inbound stream according to the connection
    /// state: exactly one handshake acceptor, or the demultiplexer once
    /// active.
    fn receive(&mut self, mut s: Bytes) -> Result<(), RdpError> {
        let state = self.core_mut()?.state();
        trace!(%state, len = s.len(), "stream delivered");

        match state {
            ConnectionState::Initial => self.core_mut()?.accept_nego(&mut s),
            ConnectionState::Nego => self.core_mut()?.accept_mcs_connect_initial(&mut s),
            ConnectionState::McsConnect => self.core_mut()?.accept_mcs_erect_domain(&mut s),
            ConnectionState::McsErectDomain => self.core_mut()?.accept_mcs_attach_user(&mut s),
            ConnectionState::McsAttachUser => self.core_mut()?.accept_mcs_channel_join(&mut s),
            ConnectionState::McsChannelJoin => self.core_mut()?.accept_client_info(&mut s),
            ConnectionState::License => self.core_mut()?.accept_confirm_active(&mut s),
            ConnectionState::Active => self.recv_pdu(&mut s),
        }
    }

    /// Active-phase framing discrimination: TPKT or fast-path.
    fn recv_pdu(&mut self, s: &mut Bytes) -> Result<(), RdpError> {
        if TpktCodec::verify_header(s.as_ref()) {
            self.recv_tpkt_pdu(s)
        } else {
            self.recv_fastpath_pdu(s)
        }
    }

    fn recv_tpkt_pdu(&mut self, s: &mut Bytes) -> Result<(), RdpError> {
        let header = McsCodec::read_data_header(s)?;
        if header.channel_id != MCS_GLOBAL_CHANNEL_ID {
            // Virtual channel routing hangs off this point; for now the
            // bytes are consumed and dropped.
            debug!(
                channel = header.channel_id,
                len = header.length,
                "dropping non-global channel data"
            );
            return Ok(());
        }

        let control = ShareControlHeader::read(s)?;
        self.core_mut()?.settings.pdu_source = control.pdu_source;

        match control.pdu_type {
            ControlPduType::Data => self.recv_data_pdu(s),
            other => {
                error!(pdu = %other, "non-data share-control PDU while active");
                Err(RdpError::UnexpectedPdu {
                    pdu: other.to_string(),
                    state: ConnectionState::Active,
                })
            }
        }
    }

    fn recv_data_pdu(&mut self, s: &mut Bytes) -> Result<(), RdpError> {
        let header = ShareDataHeader::read(s)?;

        match header.pdu_type {
            DataPduType::Synchronize => self.core_mut()?.recv_client_synchronize(s),
            DataPduType::Control => self.core_mut()?.accept_client_control(s),
            DataPduType::BitmapCachePersistentList => {
                // Consumed but not acted on; no server-side persistence
                // semantics are defined yet.
                debug!("bitmap cache persistent list ignored");
                Ok(())
            }
            DataPduType::FontList => self.finish_activation(s),
            DataPduType::ShutdownRequest => {
                debug!("client requested shutdown");
                self.core_mut()?.send_disconnect_ultimatum()?;
                Err(RdpError::ShutdownRequested)
            }
            other => {
                let prefix = &s.as_ref()[..s.remaining().min(16)];
                warn!(
                    pdu_type = other.as_u8(),
                    payload = %hex::encode(prefix),
                    "ignoring unrecognized data PDU"
                );
                Ok(())
            }
        }
    }

    /// Font list completes (re)activation: answer with the font map, then
    /// run the lifecycle hooks. `post_connect` is consumed on first use so
    /// it cannot fire again on reactivation.
    fn finish_activation(&mut self, s: &mut Bytes) -> Result<(), RdpError> {
        self.core_mut()?.accept_client_font_list(s)?;

        let context = self.context.as_mut().ok_or(RdpError::NotConnected)?;
        if !self.post_connect_done {
            if !self.handler.post_connect(context) {
                return Err(RdpError::CallbackRejected {
                    callback: "post_connect",
                });
            }
            self.post_connect_done = true;
        }

        if !self.handler.activate(context) {
            return Err(RdpError::CallbackRejected {
                callback: "activate",
            });
        }
        Ok(())
    }

    fn recv_fastpath_pdu(&mut self, s: &mut Bytes) -> Result<(), RdpError> {
        let core = self.core_mut()?;
        let length = core.fastpath.read_header(s)?;

        if length == 0 || usize::from(length) > s.remaining() {
            return Err(RdpError::Framing {
                reason: format!(
                    "fast-path PDU length {length} with {} bytes remaining",
                    s.remaining()
                ),
            });
        }

        if core.fastpath.encryption_flags & FASTPATH_INPUT_ENCRYPTED != 0 {
            // No PDU-level crypto is ever negotiated by this engine.
            return Err(RdpError::Protocol {
                message: "encrypted fast-path PDU without negotiated session encryption"
                    .to_string(),
            });
        }

        let mut payload = s.split_to(usize::from(length));
        let RdpCore {
            fastpath, input, ..
        } = core;
        fastpath.recv_inputs(&mut payload, input)
    }
}

impl Drop for RdpPeer {
    fn drop(&mut self) {
        self.context_free();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use bytes::BufMut;

    use super::super::protocol::{mcs, per};
    use super::super::test_support::{ScriptedTransport, ScriptedTransportHandle};
    use super::*;

    #[derive(Clone, Default)]
    struct HookLog(Arc<Mutex<Vec<&'static str>>>);

    impl HookLog {
        fn events(&self) -> Vec<&'static str> {
            self.0.lock().unwrap().clone()
        }
    }

    struct LoggingHandler {
        log: HookLog,
        accept_post_connect: bool,
    }

    impl PeerHandler for LoggingHandler {
        fn context_new(&mut self, _context: &mut PeerContext) {
            self.log.0.lock().unwrap().push("context_new");
        }

        fn context_free(&mut self, _context: &mut PeerContext) {
            self.log.0.lock().unwrap().push("context_free");
        }

        fn post_connect(&mut self, _context: &mut PeerContext) -> bool {
            self.log.0.lock().unwrap().push("post_connect");
            self.accept_post_connect
        }

        fn activate(&mut self, _context: &mut PeerContext) -> bool {
            self.log.0.lock().unwrap().push("activate");
            true
        }
    }

    fn scripted_peer(accept_post_connect: bool) -> (RdpPeer, ScriptedTransportHandle, HookLog) {
        let (transport, handle) = ScriptedTransport::new();
        let log = HookLog::default();
        let handler = LoggingHandler {
            log: log.clone(),
            accept_post_connect,
        };
        let peer = RdpPeer::with_transport(
            Box::new(transport),
            QuaysideConfig::default(),
            Box::new(handler),
        );
        (peer, handle, log)
    }

    fn active_peer() -> (RdpPeer, ScriptedTransportHandle, HookLog) {
        let (mut peer, handle, log) = scripted_peer(true);
        peer.context_new().unwrap();
        peer.initialize().unwrap();
        peer.core_mut().unwrap().state = ConnectionState::Active;
        (peer, handle, log)
    }

    fn share_id(peer: &RdpPeer) -> u32 {
        peer.context().unwrap().settings().share_id
    }

    /// Client-side share-data PDU on the global channel.
    fn client_data_pdu(share_id: u32, pdu_type: u8, body: &[u8]) -> Bytes {
        client_channel_pdu(mcs::MCS_GLOBAL_CHANNEL_ID, share_id, pdu_type, body)
    }

    fn client_channel_pdu(channel_id: u16, share_id: u32, pdu_type: u8, body: &[u8]) -> Bytes {
        let mut share = Vec::new();
        let total = 18 + body.len();
        share.put_u16_le(total as u16);
        share.put_u16_le(0x7 | 0x10); // data PDU, version 1
        share.put_u16_le(1002);
        share.put_u32_le(share_id);
        share.put_u8(0);
        share.put_u8(1);
        share.put_u16_le((12 + body.len()) as u16);
        share.put_u8(pdu_type);
        share.put_u8(0);
        share.put_u16_le(0);
        share.extend_from_slice(body);

        let mut sdr = Vec::new();
        per::write_choice(&mut sdr, 25 << 2); // send-data request
        per::write_integer16(&mut sdr, 1002, 1001);
        per::write_integer16(&mut sdr, channel_id, 0);
        sdr.put_u8(0x70);
        per::write_length(&mut sdr, share.len());
        sdr.extend_from_slice(&share);

        let mut frame = Vec::new();
        TpktCodec::write_header(&mut frame, (7 + sdr.len()) as u16);
        frame.push(2);
        frame.push(0xF0);
        frame.push(0x80);
        frame.extend_from_slice(&sdr);
        Bytes::from(frame)
    }

    fn font_list_body() -> Vec<u8> {
        let mut body = Vec::new();
        body.put_u16_le(0);
        body.put_u16_le(0);
        body.put_u16_le(0x0003);
        body.put_u16_le(0x0032);
        body
    }

    #[test]
    fn test_context_new_runs_hook_and_is_idempotent() {
        let (mut peer, _handle, log) = scripted_peer(true);

        peer.context_new().unwrap();
        peer.context_new().unwrap();

        assert_eq!(log.events(), ["context_new"]);
        assert!(peer.context().is_some());
    }

    #[test]
    fn test_initialize_sets_server_mode() {
        let (mut peer, _handle, _log) = scripted_peer(true);
        assert!(matches!(peer.initialize(), Err(RdpError::NotConnected)));

        peer.context_new().unwrap();
        peer.initialize().unwrap();

        let settings = peer.context().unwrap().settings();
        assert!(settings.server_mode);
        assert_eq!(peer.context().unwrap().state(), ConnectionState::Initial);
    }

    #[test]
    fn test_context_free_fires_once_and_on_drop() {
        let (mut peer, _handle, log) = scripted_peer(true);
        peer.context_new().unwrap();

        peer.context_free();
        peer.context_free();
        drop(peer);

        assert_eq!(log.events(), ["context_new", "context_free"]);
    }

    #[test]
    fn test_disconnect_is_idempotent_before_and_after_context() {
        let (mut peer, handle, _log) = scripted_peer(true);
        peer.disconnect();
        peer.disconnect();

        peer.context_new().unwrap();
        peer.disconnect();
        peer.disconnect();
        assert!(!handle.is_connected());
    }

    #[tokio::test]
    async fn test_unknown_data_pdu_is_logged_not_fatal() {
        let (mut peer, handle, log) = active_peer();

        handle.push_frame(client_data_pdu(share_id(&peer), 0xEE, &[1, 2, 3]));
        peer.check_fds().await.unwrap();

        assert_eq!(peer.context().unwrap().state(), ConnectionState::Active);
        assert_eq!(log.events(), ["context_new"]);
    }

    #[tokio::test]
    async fn test_non_global_channel_data_is_dropped() {
        let (mut peer, handle, _log) = active_peer();

        handle.push_frame(client_channel_pdu(1007, share_id(&peer), 0xEE, &[0; 4]));
        peer.check_fds().await.unwrap();

        assert_eq!(peer.context().unwrap().state(), ConnectionState::Active);
    }

    #[tokio::test]
    async fn test_shutdown_request_sends_ultimatum_and_terminates() {
        let (mut peer, handle, _log) = active_peer();
        let before = handle.sent_frames().len();

        handle.push_frame(client_data_pdu(share_id(&peer), 36, &[]));
        let result = peer.check_fds().await;

        assert!(matches!(result, Err(RdpError::ShutdownRequested)));
        let sent = handle.sent_frames();
        assert_eq!(sent.len(), before + 1);
        assert_eq!(
            sent.last().unwrap().as_ref(),
            &[3, 0, 0, 9, 2, 0xF0, 0x80, 0x21, 0x80]
        );
    }

    #[tokio::test]
    async fn test_invalid_framing_routes_to_fastpath_and_fails() {
        let (mut peer, handle, _log) = active_peer();

        // Neither a TPKT header nor a fast-path PDU with a usable length.
        handle.push_frame(Bytes::from_static(&[0x48, 0x00]));
        let result = peer.check_fds().await;

        assert!(matches!(result, Err(RdpError::Framing { .. })));
    }

    #[tokio::test]
    async fn test_encrypted_fastpath_is_rejected() {
        let (mut peer, handle, _log) = active_peer();

        // Encryption flag set in the fast-path header.
        handle.push_frame(Bytes::from_static(&[0x84, 4, 0, 0]));
        let result = peer.check_fds().await;

        assert!(matches!(result, Err(RdpError::Protocol { .. })));
    }

    #[tokio::test]
    async fn test_font_list_runs_hooks_with_one_shot_post_connect() {
        let (mut peer, handle, log) = active_peer();

        handle.push_frame(client_data_pdu(share_id(&peer), 39, &font_list_body()));
        peer.check_fds().await.unwrap();
        assert_eq!(log.events(), ["context_new", "post_connect", "activate"]);

        // A second font list (reactivation replay) fires activate only.
        handle.push_frame(client_data_pdu(share_id(&peer), 39, &font_list_body()));
        peer.check_fds().await.unwrap();
        assert_eq!(
            log.events(),
            ["context_new", "post_connect", "activate", "activate"]
        );
    }

    #[tokio::test]
    async fn test_rejecting_post_connect_fails_session_before_activate() {
        let (mut peer, handle, log) = scripted_peer(false);
        peer.context_new().unwrap();
        peer.initialize().unwrap();
        peer.core_mut().unwrap().state = ConnectionState::Active;

        handle.push_frame(client_data_pdu(share_id(&peer), 39, &font_list_body()));
        let result = peer.check_fds().await;

        assert!(matches!(
            result,
            Err(RdpError::CallbackRejected {
                callback: "post_connect"
            })
        ));
        assert_eq!(log.events(), ["context_new", "post_connect"]);
    }

    #[tokio::test]
    async fn test_non_data_control_pdu_while_active_is_fatal() {
        let (mut peer, handle, _log) = active_peer();

        // Share-control header claiming a Demand-Active from the client.
        let mut share = Vec::new();
        share.put_u16_le(6);
        share.put_u16_le(0x1 | 0x10);
        share.put_u16_le(1002);

        let mut sdr = Vec::new();
        per::write_choice(&mut sdr, 25 << 2);
        per::write_integer16(&mut sdr, 1002, 1001);
        per::write_integer16(&mut sdr, mcs::MCS_GLOBAL_CHANNEL_ID, 0);
        sdr.put_u8(0x70);
        per::write_length(&mut sdr, share.len());
        sdr.extend_from_slice(&share);

        let mut frame = Vec::new();
        TpktCodec::write_header(&mut frame, (7 + sdr.len()) as u16);
        frame.extend_from_slice(&[2, 0xF0, 0x80]);
        frame.extend_from_slice(&sdr);

        handle.push_frame(Bytes::from(frame));
        let result = peer.check_fds().await;
        assert!(matches!(result, Err(RdpError::UnexpectedPdu { .. })));
    }
}
