//! Transport layer abstraction
//!
//! The session driver is written against [`TransportStream`] so the byte
//! pipe underneath is pluggable: plain TCP ships here, a TLS or proxy
//! transport implements [`Transport`] and hands back its own stream.

use async_trait::async_trait;
use silkwire_core::Result;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// A connected bidirectional byte stream.
///
/// Blanket-implemented for every async stream type, including
/// `tokio::net::TcpStream` and TLS wrappers around it.
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> TransportStream for T {}

/// Establishes transport streams for new sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to `host:port` and return the stream the session will run on.
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn TransportStream>>;
}

/// Plain TCP transport
#[derive(Debug, Default)]
pub struct TcpTransport;

impl TcpTransport {
    /// Create a TCP transport
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn TransportStream>> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}
