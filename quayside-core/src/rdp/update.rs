//! Update subsystem: the server-to-client graphics seam
//!
//! Graphics encoding lives outside the engine. The peer wires this module up
//! during context binding so an embedder can drive paints once the session
//! activates; the engine itself only registers the server-side entry points.

use tracing::trace;

/// Server-side update dispatch point owned by the RDP core.
#[derive(Debug, Default)]
pub struct Update {
    server_mode: bool,
    painting: bool,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the server-role entry points. Called once during context
    /// binding; paints are rejected until then.
    pub(crate) fn register_server_callbacks(&mut self) {
        self.server_mode = true;
        trace!("server update callbacks registered");
    }

    /// Opens a paint sequence. Returns false when the update path is not in
    /// server mode or a sequence is already open.
    pub fn begin_paint(&mut self) -> bool {
        if !self.server_mode || self.painting {
            return false;
        }
        self.painting = true;
        true
    }

    /// Closes the current paint sequence.
    pub fn end_paint(&mut self) -> bool {
        if !self.painting {
            return false;
        }
        self.painting = false;
        true
    }

    pub fn is_painting(&self) -> bool {
        self.painting
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paints_require_server_registration() {
        let mut update = Update::new();
        assert!(!update.begin_paint());

        update.register_server_callbacks();
        assert!(update.begin_paint());
        assert!(update.is_painting());
        assert!(!update.begin_paint());
        assert!(update.end_paint());
        assert!(!update.end_paint());
    }
}
