//! Session event handler
//!
//! The user hands one [`EventHandler`] to each session; the session calls
//! into it from its dispatch task, in wire order. Callbacks must not block:
//! long-running work belongs on the caller's own executor.

use bytes::Bytes;

/// Receives session events.
///
/// Every method has a no-op default so handlers implement only what they
/// care about.
pub trait EventHandler: Send + Sync {
    /// The opening handshake completed and the session is open.
    fn on_connected(&self) {}

    /// A complete text message arrived. The payload is validated UTF-8.
    fn on_text(&self, _message: String) {}

    /// A complete binary message arrived.
    fn on_binary(&self, _message: Bytes) {}

    /// A PING arrived. The session has already queued the PONG reply.
    fn on_ping(&self, _payload: &[u8]) {}

    /// A PONG arrived and any outstanding ping deadline was disarmed.
    fn on_pong(&self, _payload: &[u8]) {}

    /// The session is closed. Fires exactly once per session, whichever
    /// side initiated and however the connection ended.
    fn on_close(&self, _code: u16, _reason: &str) {}
}
