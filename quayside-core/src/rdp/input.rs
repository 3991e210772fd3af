//! Input subsystem: the seam where client input events leave the engine

/// Receiver for decoded client input events.
///
/// All methods default to no-ops, so embedders implement only what they
/// consume. Flags are passed through as carried by the fast-path input
/// event headers.
pub trait InputHandler: Send {
    fn synchronize_event(&mut self, _toggle_flags: u32) {}

    fn keyboard_event(&mut self, _flags: u16, _scancode: u16) {}

    fn unicode_keyboard_event(&mut self, _flags: u16, _code_unit: u16) {}

    fn mouse_event(&mut self, _pointer_flags: u16, _x: u16, _y: u16) {}

    fn extended_mouse_event(&mut self, _pointer_flags: u16, _x: u16, _y: u16) {}
}

/// Input dispatch point owned by the RDP core.
#[derive(Default)]
pub struct Input {
    handler: Option<Box<dyn InputHandler>>,
}

impl Input {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the embedder's input sink. Events arriving without a handler
    /// are dropped.
    pub fn set_handler(&mut self, handler: Box<dyn InputHandler>) {
        self.handler = Some(handler);
    }

    pub(crate) fn synchronize(&mut self, toggle_flags: u32) {
        if let Some(handler) = &mut self.handler {
            handler.synchronize_event(toggle_flags);
        }
    }

    pub(crate) fn keyboard(&mut self, flags: u16, scancode: u16) {
        if let Some(handler) = &mut self.handler {
            handler.keyboard_event(flags, scancode);
        }
    }

    pub(crate) fn unicode_keyboard(&mut self, flags: u16, code_unit: u16) {
        if let Some(handler) = &mut self.handler {
            handler.unicode_keyboard_event(flags, code_unit);
        }
    }

    pub(crate) fn mouse(&mut self, pointer_flags: u16, x: u16, y: u16) {
        if let Some(handler) = &mut self.handler {
            handler.mouse_event(pointer_flags, x, y);
        }
    }

    pub(crate) fn extended_mouse(&mut self, pointer_flags: u16, x: u16, y: u16) {
        if let Some(handler) = &mut self.handler {
            handler.extended_mouse_event(pointer_flags, x, y);
        }
    }
}
