//! Prelude module for Silkwire
//!
//! Re-exports the types most client code needs.

pub use crate::config::SessionConfig;
pub use crate::factory::WebSocketFactory;
pub use crate::handler::EventHandler;
pub use crate::session::{MessageKind, PartialMessageWriter, WebSocket};
pub use crate::transport::{TcpTransport, Transport, TransportStream};

// Re-export core types for convenience
pub use silkwire_core::deflate::{CompressionStrategy, DeflateRequest};
pub use silkwire_core::prelude::*;

// Re-export commonly used external dependencies
pub use std::sync::Arc;
pub use std::time::Duration;
