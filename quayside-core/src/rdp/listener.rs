//! Inbound listener: accepts sockets and wraps them as peers

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{debug, info};

use super::peer::{PeerHandler, RdpPeer};
use crate::config::QuaysideConfig;
use crate::rdp::RdpError;

/// TCP accept front for the peer engine.
///
/// Each accepted socket becomes an [`RdpPeer`] carrying the listener's
/// configuration; the caller binds the context and runs the readiness loop,
/// typically one task per peer.
pub struct PeerListener {
    listener: TcpListener,
    config: QuaysideConfig,
}

impl PeerListener {
    /// Binds the listening socket.
    ///
    /// # Errors
    ///
    /// - `RdpError::Io` - The address cannot be bound
    pub async fn bind(addr: SocketAddr, config: QuaysideConfig) -> Result<Self, RdpError> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "listening for RDP clients");
        Ok(Self { listener, config })
    }

    /// Local address the listener bound to.
    ///
    /// # Errors
    ///
    /// - `RdpError::Io` - The socket cannot report its address
    pub fn local_addr(&self) -> Result<SocketAddr, RdpError> {
        Ok(self.listener.local_addr()?)
    }

    /// Waits for the next inbound connection and wraps it as a peer with
    /// the given lifecycle handler.
    ///
    /// # Errors
    ///
    /// - `RdpError::Io` - Accept failure
    pub async fn accept(
        &self,
        handler: Box<dyn PeerHandler>,
    ) -> Result<(RdpPeer, SocketAddr), RdpError> {
        let (stream, addr) = self.listener.accept().await?;
        debug!(%addr, "client connected");
        Ok((RdpPeer::new(stream, self.config.clone(), handler), addr))
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpStream;

    use super::super::peer::PeerContext;
    use super::*;

    struct NoopHandler;
    impl PeerHandler for NoopHandler {}

    #[tokio::test]
    async fn test_accept_produces_bindable_peer() {
        let listener = PeerListener::bind(
            "127.0.0.1:0".parse().unwrap(),
            QuaysideConfig::default(),
        )
        .await
        .unwrap();
        let addr = listener.local_addr().unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        let (mut peer, peer_addr) = listener.accept(Box::new(NoopHandler)).await.unwrap();

        assert_eq!(peer_addr.ip(), addr.ip());
        assert!(peer.file_descriptor().is_some());

        peer.context_new().unwrap();
        peer.initialize().unwrap();
        assert!(peer.context().unwrap().settings().server_mode);
    }

    #[tokio::test]
    async fn test_handler_hook_runs_during_context_binding() {
        struct CountingHandler(std::sync::Arc<std::sync::atomic::AtomicUsize>);
        impl PeerHandler for CountingHandler {
            fn context_new(&mut self, _context: &mut PeerContext) {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        }

        let listener = PeerListener::bind(
            "127.0.0.1:0".parse().unwrap(),
            QuaysideConfig::default(),
        )
        .await
        .unwrap();
        let addr = listener.local_addr().unwrap();
        let count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let _client = TcpStream::connect(addr).await.unwrap();
        let (mut peer, _) = listener
            .accept(Box::new(CountingHandler(count.clone())))
            .await
            .unwrap();

        peer.context_new().unwrap();
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
