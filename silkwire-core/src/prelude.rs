//! Prelude module for Silkwire Core
//!
//! Re-exports the types most code working with the protocol layer needs.

pub use crate::error::{close_code, Error, Result};
pub use crate::extension::{Extension, ExtensionInfo, ExtensionParameter, ExtensionRequest};
pub use crate::frame::{Frame, FrameDecoder, FrameEncoder};
pub use crate::handshake::{Handshake, HandshakeHandler, HandshakeProgress, HandshakeResponse};
pub use crate::message::{Message, MessageAssembler};
pub use crate::protocol::Opcode;

// Re-export commonly used external dependencies
pub use bytes::{Bytes, BytesMut};
