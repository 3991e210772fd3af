//! Server-side RDP peer connection engine
//!
//! The engine accepts an inbound client socket, drives the multi-phase
//! connection handshake (X.224 negotiation, T.125 MCS setup, client info,
//! licensing, capability exchange) to an active session, then demultiplexes
//! each incoming frame into the correct handler. An embedding application
//! participates through [`PeerHandler`] lifecycle hooks and the update and
//! input seams.

pub mod core;
pub mod fastpath;
pub mod input;
pub mod license;
pub mod listener;
pub mod peer;
pub mod protocol;
pub mod settings;
pub mod state;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;
pub mod transport;
pub mod update;

pub use input::{Input, InputHandler};
pub use license::LicenseState;
pub use listener::PeerListener;
pub use peer::{PeerContext, PeerHandler, RdpPeer};
pub use protocol::mcs::MCS_GLOBAL_CHANNEL_ID;
pub use settings::Settings;
pub use state::ConnectionState;
pub use transport::{FrameTransport, TcpTransport};
pub use update::Update;

/// Errors that can occur while driving a peer session.
///
/// Everything except `ShutdownRequested` and the benign paths that never
/// surface here is fatal to the session: the error propagates up the
/// synchronous dispatch chain and the embedder tears the peer down. Nothing
/// is retried inside the engine.
#[derive(Debug, thiserror::Error)]
pub enum RdpError {
    #[error("Framing error: {reason}")]
    Framing { reason: String },

    #[error("Unexpected {pdu} PDU in state {state}")]
    UnexpectedPdu { pdu: String, state: ConnectionState },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Session rejected by {callback} callback")]
    CallbackRejected { callback: &'static str },

    #[error("Peer requested shutdown")]
    ShutdownRequested,

    #[error("Transport disconnected")]
    Disconnected,

    #[error("Transport not attached")]
    NotConnected,

    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

impl RdpError {
    /// True for terminal conditions that are ordinary session endings rather
    /// than faults worth reporting.
    pub fn is_clean_shutdown(&self) -> bool {
        matches!(self, RdpError::ShutdownRequested | RdpError::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_shutdown_classification() {
        assert!(RdpError::ShutdownRequested.is_clean_shutdown());
        assert!(RdpError::Disconnected.is_clean_shutdown());
        assert!(
            !RdpError::Framing {
                reason: "bad".to_string()
            }
            .is_clean_shutdown()
        );
    }

    #[test]
    fn test_unexpected_pdu_display_names_state() {
        let error = RdpError::UnexpectedPdu {
            pdu: "Demand-Active".to_string(),
            state: ConnectionState::Active,
        };
        assert_eq!(
            error.to_string(),
            "Unexpected Demand-Active PDU in state active"
        );
    }
}
