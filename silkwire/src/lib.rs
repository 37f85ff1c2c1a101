//! # Silkwire
//!
//! An asynchronous WebSocket client library implementing RFC 6455 with
//! optional per-message compression (RFC 7692).
//!
//! A [`WebSocketFactory`] owns the reactor runtime; each
//! [`open`](WebSocketFactory::open) performs the TCP connect and opening
//! handshake, then hands back a [`WebSocket`] whose events are delivered to
//! the caller's [`EventHandler`] in wire order.
//!
//! ```no_run
//! use silkwire::{EventHandler, SessionConfig, WebSocketFactory};
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! impl EventHandler for Echo {
//!     fn on_text(&self, message: String) {
//!         println!("received: {message}");
//!     }
//! }
//!
//! # async fn run() -> silkwire::Result<()> {
//! let factory = WebSocketFactory::new()?;
//! let config = SessionConfig::default().add_protocol("v1.example");
//! let ws = factory.open_with("ws://127.0.0.1:9001/", Arc::new(Echo), config).await?;
//! ws.send_text("hello")?;
//! ws.close();
//! # Ok(())
//! # }
//! ```
//!
//! Protocol-level pieces (framing, handshake parsing, extensions) live in
//! [`silkwire_core`] and are re-exported where they appear in this crate's
//! API.

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod config;
mod connection;
pub mod factory;
pub mod handler;
pub mod prelude;
mod reactor;
pub mod session;
pub mod transport;

pub use config::SessionConfig;
pub use factory::WebSocketFactory;
pub use handler::EventHandler;
pub use session::{MessageKind, PartialMessageWriter, WebSocket};
pub use transport::{TcpTransport, Transport, TransportStream};

pub use silkwire_core::deflate::{CompressionStrategy, DeflateRequest};
pub use silkwire_core::error::{close_code, Error, Result};
pub use silkwire_core::handshake::{HandshakeHandler, HandshakeResponse};
pub use silkwire_core::{ExtensionInfo, ExtensionRequest};
