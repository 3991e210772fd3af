//! Centralized configuration for Quayside.
//!
//! Tunable parameters live here instead of being scattered through the
//! engine as magic numbers.

/// Central configuration for all Quayside components.
#[derive(Debug, Clone, Default)]
pub struct QuaysideConfig {
    pub network: NetworkConfig,
    pub protocol: ProtocolConfig,
}

/// Socket and framing limits.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Initial capacity of the per-peer receive reassembly buffer
    pub recv_buffer_size: usize,
    /// Upper bound on a single reassembled frame; anything larger is treated
    /// as a framing error
    pub max_frame_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            recv_buffer_size: 16384, // 16 KiB
            max_frame_size: 65536,   // TPKT length field ceiling
        }
    }
}

/// Protocol-level defaults advertised before the client commits its own.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Desktop width offered in the server bitmap capability set
    pub desktop_width: u16,
    /// Desktop height offered in the server bitmap capability set
    pub desktop_height: u16,
    /// Preferred color depth in bits per pixel
    pub color_depth: u16,
    /// Operating system class reported in the general capability set
    pub os_major_type: u16,
    /// Operating system variant reported in the general capability set
    pub os_minor_type: u16,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            desktop_width: 1024,
            desktop_height: 768,
            color_depth: 16,
            os_major_type: 4, // unix
            os_minor_type: 0,
        }
    }
}
