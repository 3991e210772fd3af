//! RDP wire codecs for the layered sub-protocols under a session.
//!
//! Each module parses and emits bytes for one framing layer (TPKT, X.224,
//! T.125 MCS, security, capability exchange). Codecs never advance connection
//! state; that decision belongs to the peer engine.

pub mod ber;
pub mod capability;
pub mod client_info;
pub mod mcs;
pub mod per;
pub mod share;
pub mod tpkt;
pub mod x224;
