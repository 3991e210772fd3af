//! Scripted transport for driving the engine without sockets
//!
//! Tests queue complete inbound frames, run the peer, and inspect the frames
//! the engine wrote back. Shared state lives behind a handle so the test
//! keeps visibility after the transport moves into the peer.

use std::collections::VecDeque;
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use super::transport::FrameTransport;
use crate::rdp::RdpError;

#[derive(Default)]
struct Inner {
    incoming: VecDeque<Bytes>,
    sent: Vec<Bytes>,
    connected: bool,
}

/// Test-side view of a [`ScriptedTransport`] after the transport itself has
/// been handed to a peer.
#[derive(Clone)]
pub struct ScriptedTransportHandle(Arc<Mutex<Inner>>);

impl ScriptedTransportHandle {
    /// Queues a complete inbound frame for the next `check_fds` call.
    pub fn push_frame(&self, frame: impl Into<Bytes>) {
        self.lock().incoming.push_back(frame.into());
    }

    /// Everything the engine has sent so far, in order.
    pub fn sent_frames(&self) -> Vec<Bytes> {
        self.lock().sent.clone()
    }

    /// Drops the recorded outbound frames and returns them.
    pub fn take_sent(&self) -> Vec<Bytes> {
        std::mem::take(&mut self.lock().sent)
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.0.lock().expect("scripted transport lock poisoned")
    }
}

/// In-memory [`FrameTransport`] delivering pre-scripted frames.
pub struct ScriptedTransport(Arc<Mutex<Inner>>);

impl ScriptedTransport {
    pub fn new() -> (Self, ScriptedTransportHandle) {
        let inner = Arc::new(Mutex::new(Inner {
            incoming: VecDeque::new(),
            sent: Vec::new(),
            connected: true,
        }));
        (Self(inner.clone()), ScriptedTransportHandle(inner))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.0.lock().expect("scripted transport lock poisoned")
    }
}

#[async_trait]
impl FrameTransport for ScriptedTransport {
    fn file_descriptor(&self) -> Option<RawFd> {
        None
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn check_fds(&mut self) -> Result<Vec<Bytes>, RdpError> {
        let mut inner = self.lock();
        if !inner.connected {
            return Err(RdpError::Disconnected);
        }
        Ok(inner.incoming.drain(..).collect())
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), RdpError> {
        let mut inner = self.lock();
        if !inner.connected {
            return Err(RdpError::NotConnected);
        }
        inner.sent.push(Bytes::copy_from_slice(frame));
        Ok(())
    }

    fn disconnect(&mut self) {
        self.lock().connected = false;
    }
}
