//! # Silkwire Core
//!
//! Protocol-level building blocks for the Silkwire WebSocket client:
//!
//! - Error taxonomy and RFC 6455 close codes
//! - Frame encoding (masking, fragmentation) and incremental decoding
//! - Message assembly from fragmented frames
//! - Opening handshake construction, parsing, and negotiation
//! - Extension framework and the per-message deflate extension (RFC 7692)
//! - Process-wide log facade and seedable random source
//!
//! Nothing in this crate performs I/O; the `silkwire` crate drives these
//! pieces over a transport.

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod deflate;
pub mod error;
pub mod extension;
pub mod frame;
pub mod handshake;
pub mod log;
pub mod message;
pub mod prelude;
pub mod protocol;
pub mod random;

pub use error::{close_code, Error, Result};
pub use extension::{Extension, ExtensionInfo, ExtensionParameter, ExtensionRequest};
pub use frame::{Frame, FrameDecoder, FrameEncoder};
pub use handshake::{Handshake, HandshakeHandler, HandshakeProgress, HandshakeResponse};
pub use message::{Message, MessageAssembler};
pub use protocol::Opcode;
