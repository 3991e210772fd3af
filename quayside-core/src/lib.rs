//! Quayside Core - server-side RDP peer connection engine
//!
//! This crate provides the building blocks for embedding an RDP server:
//! the peer connection engine (handshake state machine and active-phase
//! demultiplexer), the frame transport, the inbound listener, and the
//! lifecycle hooks an application implements to drive sessions.

pub mod config;
pub mod rdp;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::QuaysideConfig;
pub use rdp::{
    ConnectionState, FrameTransport, InputHandler, PeerContext, PeerHandler, PeerListener,
    RdpError, RdpPeer,
};

/// Core errors that can bubble up from any Quayside subsystem.
#[derive(Debug, thiserror::Error)]
pub enum QuaysideError {
    #[error("RDP error: {0}")]
    Rdp(#[from] RdpError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, QuaysideError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rdp_errors_convert() {
        let error: QuaysideError = RdpError::Disconnected.into();
        assert!(matches!(error, QuaysideError::Rdp(RdpError::Disconnected)));
    }
}
