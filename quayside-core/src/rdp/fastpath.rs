//! Fast-path input: the abbreviated post-activation framing

use bytes::{Buf, Bytes};
use tracing::trace;

use super::input::Input;
use crate::rdp::RdpError;

/// Encryption flag carried in the two high bits of the fast-path header.
pub const FASTPATH_INPUT_ENCRYPTED: u8 = 0x2;

/// Fast-path input event codes.
const FASTPATH_INPUT_EVENT_SCANCODE: u8 = 0;
const FASTPATH_INPUT_EVENT_MOUSE: u8 = 1;
const FASTPATH_INPUT_EVENT_MOUSEX: u8 = 2;
const FASTPATH_INPUT_EVENT_SYNC: u8 = 3;
const FASTPATH_INPUT_EVENT_UNICODE: u8 = 4;

/// Fast-path receive state for one session.
#[derive(Debug, Default)]
pub struct Fastpath {
    /// Flags from the most recent header; checked by the demultiplexer
    /// before the payload is interpreted.
    pub encryption_flags: u8,
    num_events: u8,
}

impl Fastpath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a fast-path input header, records its flags and event count,
    /// and returns the payload length remaining after the header.
    ///
    /// A declared length shorter than the header itself yields zero; the
    /// caller treats that as a framing failure together with the
    /// bytes-remaining check.
    ///
    /// # Errors
    ///
    /// - `RdpError::Framing` - Fewer bytes than a header needs
    pub fn read_header(&mut self, s: &mut Bytes) -> Result<u16, RdpError> {
        if s.remaining() < 2 {
            return Err(RdpError::Framing {
                reason: "fast-path header truncated".to_string(),
            });
        }

        let header = s.get_u8();
        self.encryption_flags = (header >> 6) & 0x03;
        self.num_events = (header >> 2) & 0x0F;

        let first = s.get_u8();
        let (total, header_len) = if first & 0x80 != 0 {
            if s.remaining() < 1 {
                return Err(RdpError::Framing {
                    reason: "fast-path length truncated".to_string(),
                });
            }
            ((u16::from(first & 0x7F) << 8) | u16::from(s.get_u8()), 3u16)
        } else {
            (u16::from(first), 2u16)
        };

        Ok(total.saturating_sub(header_len))
    }

    /// Parses the input events of a fast-path payload and dispatches each to
    /// the input subsystem.
    ///
    /// # Errors
    ///
    /// - `RdpError::Framing` - An event overruns the payload
    /// - `RdpError::Protocol` - Unrecognized event code
    pub fn recv_inputs(&mut self, s: &mut Bytes, input: &mut Input) -> Result<(), RdpError> {
        let count = if self.num_events != 0 {
            self.num_events
        } else {
            if s.remaining() < 1 {
                return Err(RdpError::Framing {
                    reason: "fast-path event count truncated".to_string(),
                });
            }
            s.get_u8()
        };

        trace!(count, "dispatching fast-path input events");
        for _ in 0..count {
            Self::recv_input_event(s, input)?;
        }
        Ok(())
    }

    fn recv_input_event(s: &mut Bytes, input: &mut Input) -> Result<(), RdpError> {
        if s.remaining() < 1 {
            return Err(RdpError::Framing {
                reason: "fast-path event header truncated".to_string(),
            });
        }

        let event_header = s.get_u8();
        let flags = u16::from(event_header & 0x1F);
        let code = event_header >> 5;

        match code {
            FASTPATH_INPUT_EVENT_SCANCODE => {
                Self::need(s, 1)?;
                let scancode = u16::from(s.get_u8());
                input.keyboard(flags, scancode);
            }
            FASTPATH_INPUT_EVENT_MOUSE => {
                Self::need(s, 6)?;
                let pointer_flags = s.get_u16_le();
                let x = s.get_u16_le();
                let y = s.get_u16_le();
                input.mouse(pointer_flags, x, y);
            }
            FASTPATH_INPUT_EVENT_MOUSEX => {
                Self::need(s, 6)?;
                let pointer_flags = s.get_u16_le();
                let x = s.get_u16_le();
                let y = s.get_u16_le();
                input.extended_mouse(pointer_flags, x, y);
            }
            FASTPATH_INPUT_EVENT_SYNC => {
                input.synchronize(u32::from(flags));
            }
            FASTPATH_INPUT_EVENT_UNICODE => {
                Self::need(s, 2)?;
                let code_unit = s.get_u16_le();
                input.unicode_keyboard(flags, code_unit);
            }
            other => {
                return Err(RdpError::Protocol {
                    message: format!("unknown fast-path input event code {other}"),
                });
            }
        }
        Ok(())
    }

    fn need(s: &Bytes, bytes: usize) -> Result<(), RdpError> {
        if s.remaining() < bytes {
            return Err(RdpError::Framing {
                reason: "fast-path event truncated".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use bytes::BufMut;

    use super::super::input::InputHandler;
    use super::*;

    #[derive(Default)]
    struct Recorder(Arc<Mutex<Vec<(u16, u16, u16)>>>);

    impl InputHandler for Recorder {
        fn mouse_event(&mut self, pointer_flags: u16, x: u16, y: u16) {
            self.0.lock().unwrap().push((pointer_flags, x, y));
        }
    }

    #[test]
    fn test_header_single_byte_length() {
        let mut fastpath = Fastpath::new();
        // One event, no encryption, total length 9.
        let mut s = Bytes::from_static(&[0x04, 9, 0, 0, 0, 0, 0, 0, 0]);

        let length = fastpath.read_header(&mut s).unwrap();
        assert_eq!(length, 7);
        assert_eq!(fastpath.encryption_flags, 0);
    }

    #[test]
    fn test_header_two_byte_length_and_flags() {
        let mut fastpath = Fastpath::new();
        let mut s = Bytes::from_static(&[0x84, 0x81, 0x04]);

        let length = fastpath.read_header(&mut s).unwrap();
        assert_eq!(length, 0x104 - 3);
        assert_eq!(fastpath.encryption_flags, FASTPATH_INPUT_ENCRYPTED);
    }

    #[test]
    fn test_header_declaring_less_than_itself_yields_zero() {
        let mut fastpath = Fastpath::new();
        let mut s = Bytes::from_static(&[0x04, 1]);
        assert_eq!(fastpath.read_header(&mut s).unwrap(), 0);
    }

    #[test]
    fn test_mouse_event_dispatch() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut input = Input::new();
        input.set_handler(Box::new(Recorder(log.clone())));

        let mut fastpath = Fastpath::new();
        let mut payload = Vec::new();
        payload.put_u8(1 << 5); // mouse event
        payload.put_u16_le(0x0800);
        payload.put_u16_le(100);
        payload.put_u16_le(200);

        // Header said one event.
        let mut header = Bytes::from_static(&[0x04, 9]);
        fastpath.read_header(&mut header).unwrap();

        let mut s = Bytes::from(payload);
        fastpath.recv_inputs(&mut s, &mut input).unwrap();

        assert_eq!(log.lock().unwrap().as_slice(), [(0x0800, 100, 200)]);
    }

    #[test]
    fn test_unknown_event_code_is_fatal() {
        let mut fastpath = Fastpath::new();
        let mut header = Bytes::from_static(&[0x04, 3]);
        fastpath.read_header(&mut header).unwrap();

        let mut input = Input::new();
        let mut s = Bytes::from_static(&[7 << 5]);
        assert!(matches!(
            fastpath.recv_inputs(&mut s, &mut input),
            Err(RdpError::Protocol { .. })
        ));
    }
}
