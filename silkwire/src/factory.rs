//! Session factory
//!
//! [`WebSocketFactory`] owns the reactor and opens sessions against it. All
//! sessions created by one factory share its runtime; destroying the
//! factory tears every one of them down.

use crate::config::SessionConfig;
use crate::connection::{read_loop, write_loop};
use crate::handler::EventHandler;
use crate::reactor::{Reactor, ReactorHandle};
use crate::session::{SessionInner, WebSocket};
use crate::transport::Transport;
use bytes::BytesMut;
use silkwire_core::error::ConfigError;
use silkwire_core::handshake::{Handshake, HandshakeProgress, Negotiated};
use silkwire_core::message::MessageAssembler;
use silkwire_core::protocol::constants;
use silkwire_core::{log, Error, FrameDecoder, Result};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use url::Url;

const TAG: &str = "factory";

/// Creates WebSocket sessions and owns the reactor driving them.
pub struct WebSocketFactory {
    reactor: Reactor,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for WebSocketFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketFactory")
            .field("alive", &self.reactor.is_alive())
            .finish()
    }
}

impl WebSocketFactory {
    /// Create a factory using the plain TCP transport.
    pub fn new() -> Result<Self> {
        Self::with_transport(Arc::new(crate::transport::TcpTransport::new()))
    }

    /// Create a factory with a custom transport (TLS, proxy, in-memory).
    pub fn with_transport(transport: Arc<dyn Transport>) -> Result<Self> {
        Ok(Self {
            reactor: Reactor::new()?,
            transport,
        })
    }

    /// Open a session with the default configuration.
    pub async fn open(&self, uri: &str, handler: Arc<dyn EventHandler>) -> Result<WebSocket> {
        self.open_with(uri, handler, SessionConfig::default()).await
    }

    /// Open a session: TCP connect, opening handshake, then frame traffic.
    ///
    /// The whole sequence is bounded by the configuration's `open_timeout`.
    /// Transport and handshake failures surface here and the socket is
    /// closed; afterwards failures go to the handler's `on_close`.
    pub async fn open_with(
        &self,
        uri: &str,
        handler: Arc<dyn EventHandler>,
        config: SessionConfig,
    ) -> Result<WebSocket> {
        if !self.reactor.is_alive() {
            return Err(Error::Destroyed);
        }
        config.validate()?;
        let url = Url::parse(uri).map_err(|e| ConfigError::InvalidUri(e.to_string()))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::InvalidUri(format!(
                "unsupported scheme: {}",
                url.scheme()
            ))
            .into());
        }

        let reactor = self.reactor.handle();
        let transport = Arc::clone(&self.transport);
        let open_timeout = config.open_timeout;

        // The open sequence and both driver tasks live on the reactor
        // runtime regardless of which runtime the caller awaits from.
        let opening = self.reactor.handle().spawn_driver(async move {
            match tokio::time::timeout(
                open_timeout,
                open_session(reactor, transport, url, handler, config),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(Error::OpenTimeout(open_timeout)),
            }
        });

        match opening.await {
            Ok(result) => result,
            // The reactor was destroyed underneath the open call.
            Err(_) => Err(Error::Destroyed),
        }
    }

    /// Destroy the factory and every session it created. Idempotent; after
    /// this returns, no further work runs on the reactor.
    pub fn destroy(&self) {
        self.reactor.destroy();
    }
}

impl Drop for WebSocketFactory {
    fn drop(&mut self) {
        self.reactor.destroy();
    }
}

async fn open_session(
    reactor: ReactorHandle,
    transport: Arc<dyn Transport>,
    url: Url,
    handler: Arc<dyn EventHandler>,
    config: SessionConfig,
) -> Result<WebSocket> {
    let host = url
        .host_str()
        .ok_or_else(|| ConfigError::InvalidUri("missing host".to_string()))?
        .to_string();
    let port = url.port_or_known_default().unwrap_or(match url.scheme() {
        "wss" => constants::DEFAULT_SECURE_PORT,
        _ => constants::DEFAULT_PORT,
    });

    let mut stream = transport.connect(&host, port).await?;

    let (negotiated, surplus) = {
        let mut handshake = Handshake::new(
            &url,
            &config.protocols,
            &config.extensions,
            &config.extra_headers,
            config.handshake_handler.as_deref(),
        );
        stream.write_all(&handshake.request_bytes()).await?;
        stream.flush().await?;

        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed during handshake",
                )));
            }
            match handshake.on_data(&chunk[..n])? {
                HandshakeProgress::NeedMore => continue,
                HandshakeProgress::Complete {
                    negotiated,
                    remaining,
                } => break (negotiated, remaining),
            }
        }
    };
    log::debug(TAG, "connection upgraded");

    Ok(start_session(
        reactor, stream, url, handler, config, negotiated, surplus,
    ))
}

fn start_session(
    reactor: ReactorHandle,
    stream: Box<dyn crate::transport::TransportStream>,
    url: Url,
    handler: Arc<dyn EventHandler>,
    config: SessionConfig,
    mut negotiated: Negotiated,
    surplus: BytesMut,
) -> WebSocket {
    let mut decoder = FrameDecoder::new(config.max_payload_size);
    let rsv_mask = negotiated
        .extensions
        .iter()
        .fold(0, |mask, e| mask | e.rsv_bits());
    decoder.set_rsv_mask(rsv_mask);
    // The same ceiling bounds raw frames, reassembled messages, and
    // whatever an extension inflates them into.
    let assembler = MessageAssembler::new(config.max_payload_size);
    for extension in negotiated.extensions.iter_mut() {
        extension.set_payload_limit(config.max_payload_size);
    }

    let (queue, commands) = mpsc::unbounded_channel();
    let inner = Arc::new(SessionInner::new(
        url,
        handler.clone(),
        reactor.clone(),
        queue,
        negotiated.protocol,
        negotiated.extensions,
        config.fragment_size,
        config.close_grace_period,
    ));
    reactor.register(&inner);

    let (read_half, write_half) = tokio::io::split(stream);
    reactor.submit(write_loop(write_half, commands, inner.clone()));
    let reader = reactor.spawn_driver(read_loop(
        read_half,
        inner.clone(),
        decoder,
        assembler,
        surplus,
    ));
    inner.set_reader_abort(reader.abort_handle());

    handler.on_connected();
    WebSocket::new(inner)
}
