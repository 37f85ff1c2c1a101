//! WebSocket protocol constants and utilities
//!
//! This module contains the fundamental protocol definitions from RFC 6455:
//! opcodes, frame header bits, handshake header names, and the accept-key
//! computation.

use base64::{engine::general_purpose, Engine as _};
use sha1::{Digest, Sha1};

/// WebSocket opcodes as defined in RFC 6455 Section 5.2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Continuation frame
    Continuation = 0x0,
    /// Text frame
    Text = 0x1,
    /// Binary frame
    Binary = 0x2,
    /// Close frame
    Close = 0x8,
    /// Ping frame
    Ping = 0x9,
    /// Pong frame
    Pong = 0xA,
}

impl Opcode {
    /// Create an Opcode from the low nibble of a frame header byte.
    /// Reserved opcodes yield `None`.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    /// Get the numeric value of the opcode
    pub fn value(&self) -> u8 {
        *self as u8
    }

    /// Check if this is a control opcode
    pub fn is_control(&self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }

    /// Check if this is a data opcode
    pub fn is_data(&self) -> bool {
        matches!(self, Opcode::Text | Opcode::Binary | Opcode::Continuation)
    }
}

/// WebSocket protocol constants
pub mod constants {
    /// WebSocket protocol version offered and required
    pub const WEBSOCKET_VERSION: &str = "13";

    /// Magic GUID appended to the nonce for the accept-key digest
    pub const WEBSOCKET_MAGIC: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

    /// Default port for `ws` URIs
    pub const DEFAULT_PORT: u16 = 80;

    /// Default port for `wss` URIs
    pub const DEFAULT_SECURE_PORT: u16 = 443;

    /// Nonce length in bytes before base64 encoding
    pub const NONCE_LEN: usize = 16;

    /// Maximum size of the response header section
    pub const MAX_HEADER_SIZE: usize = 8192;

    /// Maximum control frame payload length
    pub const MAX_CONTROL_PAYLOAD: usize = 125;

    /// Maximum close reason length (control payload minus the status code)
    pub const MAX_CLOSE_REASON: usize = 123;

    /// Default maximum inbound payload size
    pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

    /// Default opening handshake timeout
    pub const DEFAULT_OPEN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

    /// Default grace period granted to the server to answer our CLOSE
    pub const DEFAULT_CLOSE_GRACE_PERIOD: std::time::Duration = std::time::Duration::from_secs(10);
}

/// Frame header bit positions and masks
pub mod frame_bits {
    /// FIN bit in the first header byte
    pub const FIN_BIT: u8 = 0x80;

    /// Opcode mask in the first header byte
    pub const OPCODE_MASK: u8 = 0x0F;

    /// MASK bit in the second header byte
    pub const MASK_BIT: u8 = 0x80;

    /// Payload length mask for the 7-bit length
    pub const PAYLOAD_LEN_MASK: u8 = 0x7F;

    /// 7-bit length code announcing a 16-bit extended length
    pub const PAYLOAD_LEN_16: u8 = 126;

    /// 7-bit length code announcing a 64-bit extended length
    pub const PAYLOAD_LEN_64: u8 = 127;

    /// RSV1 in the compact 3-bit representation used by [`crate::frame::Frame`]
    pub const RSV1: u8 = 0b100;

    /// RSV2 in the compact 3-bit representation
    pub const RSV2: u8 = 0b010;

    /// RSV3 in the compact 3-bit representation
    pub const RSV3: u8 = 0b001;
}

/// HTTP header names used by the opening handshake (lowercase)
pub mod header {
    /// Host header
    pub const HOST: &str = "host";

    /// Upgrade header
    pub const UPGRADE: &str = "upgrade";

    /// Connection header
    pub const CONNECTION: &str = "connection";

    /// Sec-WebSocket-Key header
    pub const SEC_WEBSOCKET_KEY: &str = "sec-websocket-key";

    /// Sec-WebSocket-Version header
    pub const SEC_WEBSOCKET_VERSION: &str = "sec-websocket-version";

    /// Sec-WebSocket-Protocol header
    pub const SEC_WEBSOCKET_PROTOCOL: &str = "sec-websocket-protocol";

    /// Sec-WebSocket-Extensions header
    pub const SEC_WEBSOCKET_EXTENSIONS: &str = "sec-websocket-extensions";

    /// Sec-WebSocket-Accept header
    pub const SEC_WEBSOCKET_ACCEPT: &str = "sec-websocket-accept";
}

/// Generate a `Sec-WebSocket-Key` value: base64 of 16 random bytes.
pub fn generate_key() -> String {
    let mut nonce = [0u8; constants::NONCE_LEN];
    crate::random::fill(&mut nonce);
    general_purpose::STANDARD.encode(nonce)
}

/// Compute the `Sec-WebSocket-Accept` value for a client key.
pub fn accept_for(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(constants::WEBSOCKET_MAGIC.as_bytes());
    general_purpose::STANDARD.encode(hasher.finalize())
}
