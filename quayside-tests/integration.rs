//! Integration tests for the Quayside peer engine
//!
//! These tests drive a complete peer through a scripted transport: a
//! client-side byte builder emulates what a real RDP client puts on the
//! wire, and the assertions cover connection-phase progression, active-phase
//! demultiplexing, and the embedder lifecycle contract.

#[path = "integration/client.rs"]
mod client;

#[path = "integration/active_phase.rs"]
mod active_phase;
#[path = "integration/handshake.rs"]
mod handshake;
#[path = "integration/lifecycle.rs"]
mod lifecycle;
