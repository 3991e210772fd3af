//! Byte transport: non-blocking socket I/O and inbound frame reassembly
//!
//! The transport owns the socket for the lifetime of a session. It slices the
//! inbound byte stream into complete frames (TPKT-length or fast-path-length
//! delimited) and hands them to the peer in arrival order. Writes are whole
//! frames, buffered toward the non-blocking socket so acceptors never stall.

use std::io;
use std::os::fd::{AsRawFd, RawFd};

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use tokio::net::TcpStream;
use tracing::trace;

use super::protocol::tpkt::{TPKT_HEADER_LENGTH, TPKT_VERSION};
use crate::config::NetworkConfig;
use crate::rdp::RdpError;

/// Abstract frame-oriented transport under the peer engine.
///
/// The production implementation is [`TcpTransport`]. Embedders substitute
/// their own to interpose TLS, and tests drive the engine through a scripted
/// implementation.
#[async_trait]
pub trait FrameTransport: Send {
    /// Raw descriptor for readiness integration, when one exists.
    fn file_descriptor(&self) -> Option<RawFd>;

    /// Whether the connection is still attached.
    fn is_connected(&self) -> bool;

    /// Drives I/O forward: flushes pending writes, performs non-blocking
    /// reads, and returns every complete inbound frame reassembled so far,
    /// in order. An empty vector is normal when no full frame has arrived.
    ///
    /// # Errors
    ///
    /// - `RdpError::Disconnected` - Orderly close by the remote end
    /// - `RdpError::Framing` - The byte stream cannot be sliced into frames
    /// - `RdpError::Io` - Socket-level failure
    async fn check_fds(&mut self) -> Result<Vec<Bytes>, RdpError>;

    /// Queues one complete outbound frame and flushes as far as the socket
    /// allows without blocking.
    ///
    /// # Errors
    ///
    /// - `RdpError::NotConnected` - Transport already torn down
    /// - `RdpError::Io` - Socket-level failure
    fn send(&mut self, frame: &[u8]) -> Result<(), RdpError>;

    /// Tears the connection down. Safe to call repeatedly.
    fn disconnect(&mut self);
}

/// Production transport over a tokio TCP stream.
pub struct TcpTransport {
    stream: Option<TcpStream>,
    recv_buf: BytesMut,
    send_buf: BytesMut,
    max_frame_size: usize,
    eof: bool,
}

impl TcpTransport {
    /// Takes ownership of an accepted socket. Tokio sockets are non-blocking
    /// by construction, which the engine relies on throughout the session.
    pub fn attach(stream: TcpStream, config: &NetworkConfig) -> Self {
        Self {
            stream: Some(stream),
            recv_buf: BytesMut::with_capacity(config.recv_buffer_size),
            send_buf: BytesMut::new(),
            max_frame_size: config.max_frame_size,
            eof: false,
        }
    }

    fn flush(&mut self) -> Result<(), RdpError> {
        let Some(stream) = self.stream.as_ref() else {
            return Ok(());
        };

        while !self.send_buf.is_empty() {
            match stream.try_write(&self.send_buf) {
                Ok(0) => break,
                Ok(n) => self.send_buf.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(RdpError::Io(e)),
            }
        }
        Ok(())
    }

    fn drain_frames(&mut self) -> Result<Vec<Bytes>, RdpError> {
        let mut frames = Vec::new();
        while let Some(frame) = split_frame(&mut self.recv_buf, self.max_frame_size)? {
            trace!(len = frame.len(), "reassembled inbound frame");
            frames.push(frame);
        }
        Ok(frames)
    }
}

#[async_trait]
impl FrameTransport for TcpTransport {
    fn file_descriptor(&self) -> Option<RawFd> {
        self.stream.as_ref().map(AsRawFd::as_raw_fd)
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn check_fds(&mut self) -> Result<Vec<Bytes>, RdpError> {
        self.flush()?;

        let Some(stream) = self.stream.as_mut() else {
            return Err(RdpError::NotConnected);
        };

        if !self.eof {
            stream.readable().await.map_err(RdpError::Io)?;
            loop {
                match stream.try_read_buf(&mut self.recv_buf) {
                    Ok(0) => {
                        self.eof = true;
                        break;
                    }
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => return Err(RdpError::Io(e)),
                }
            }
        }

        let frames = self.drain_frames()?;
        if frames.is_empty() && self.eof {
            return Err(RdpError::Disconnected);
        }
        Ok(frames)
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), RdpError> {
        if self.stream.is_none() {
            return Err(RdpError::NotConnected);
        }
        self.send_buf.extend_from_slice(frame);
        self.flush()
    }

    fn disconnect(&mut self) {
        // Dropping the stream closes the socket; repeat calls are no-ops.
        self.stream = None;
        self.send_buf.clear();
    }
}

/// Slices one complete frame off the front of `buf`, if enough bytes have
/// arrived to cover the length its header declares.
///
/// # Errors
///
/// - `RdpError::Framing` - A header declares an impossible length
fn split_frame(buf: &mut BytesMut, max_frame_size: usize) -> Result<Option<Bytes>, RdpError> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let (frame_len, header_len) = if buf[0] == TPKT_VERSION {
        if buf.len() < TPKT_HEADER_LENGTH {
            return Ok(None);
        }
        (
            u16::from_be_bytes([buf[2], buf[3]]) as usize,
            TPKT_HEADER_LENGTH,
        )
    } else if buf[1] & 0x80 != 0 {
        if buf.len() < 3 {
            return Ok(None);
        }
        ((usize::from(buf[1] & 0x7F) << 8) | usize::from(buf[2]), 3)
    } else {
        (usize::from(buf[1]), 2)
    };

    if frame_len < header_len || frame_len > max_frame_size {
        return Err(RdpError::Framing {
            reason: format!("inbound frame declares {frame_len} bytes"),
        });
    }

    if buf.len() < frame_len {
        return Ok(None);
    }
    Ok(Some(buf.split_to(frame_len).freeze()))
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    use super::*;

    fn default_net() -> NetworkConfig {
        NetworkConfig::default()
    }

    #[test]
    fn test_split_frame_waits_for_full_tpkt() {
        let mut buf = BytesMut::from(&[3u8, 0, 0, 8, 1, 2][..]);
        assert!(split_frame(&mut buf, 65536).unwrap().is_none());

        buf.extend_from_slice(&[3, 4]);
        let frame = split_frame(&mut buf, 65536).unwrap().unwrap();
        assert_eq!(frame.as_ref(), &[3, 0, 0, 8, 1, 2, 3, 4]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_split_frame_fastpath_single_byte_length() {
        let mut buf = BytesMut::from(&[0x44u8, 5, 0xAA, 0xBB, 0xCC][..]);
        let frame = split_frame(&mut buf, 65536).unwrap().unwrap();
        assert_eq!(frame.len(), 5);
    }

    #[test]
    fn test_split_frame_fastpath_two_byte_length() {
        let mut data = vec![0x44u8, 0x80 | 0x01, 0x04];
        data.resize(0x104, 0);
        let mut buf = BytesMut::from(&data[..]);

        let frame = split_frame(&mut buf, 65536).unwrap().unwrap();
        assert_eq!(frame.len(), 0x104);
    }

    #[test]
    fn test_split_frame_rejects_zero_length() {
        let mut buf = BytesMut::from(&[0x44u8, 0, 0, 0][..]);
        assert!(split_frame(&mut buf, 65536).is_err());
    }

    #[test]
    fn test_split_frame_rejects_oversized_frame() {
        let mut buf = BytesMut::from(&[3u8, 0, 0xFF, 0xFF][..]);
        assert!(split_frame(&mut buf, 1024).is_err());
    }

    #[tokio::test]
    async fn test_tcp_transport_reassembles_split_writes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        let mut transport = TcpTransport::attach(server, &default_net());

        client.write_all(&[3, 0]).await.unwrap();
        client.write_all(&[0, 8, 1, 2, 3, 4]).await.unwrap();

        let mut frames = Vec::new();
        while frames.is_empty() {
            frames = transport.check_fds().await.unwrap();
        }
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), &[3, 0, 0, 8, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_tcp_transport_reports_remote_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        let mut transport = TcpTransport::attach(server, &default_net());

        drop(client);
        let result = loop {
            match transport.check_fds().await {
                Ok(frames) => assert!(frames.is_empty()),
                Err(e) => break e,
            }
        };
        assert!(matches!(result, RdpError::Disconnected));
    }

    #[tokio::test]
    async fn test_tcp_transport_disconnect_is_idempotent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        let mut transport = TcpTransport::attach(server, &default_net());

        assert!(transport.file_descriptor().is_some());
        transport.disconnect();
        transport.disconnect();
        assert!(!transport.is_connected());
        assert!(transport.file_descriptor().is_none());
        assert!(matches!(transport.send(&[1]), Err(RdpError::NotConnected)));
    }
}
