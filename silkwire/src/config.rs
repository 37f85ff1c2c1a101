//! Session configuration
//!
//! Options recognized when opening a session: subprotocols and extensions to
//! offer, payload and fragmentation limits, the optional handshake hook,
//! extra request headers, and the open/close timing knobs.

use silkwire_core::error::ConfigError;
use silkwire_core::handshake::HandshakeHandler;
use silkwire_core::protocol::constants;
use silkwire_core::{ExtensionRequest, Result};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for one session
pub struct SessionConfig {
    /// Subprotocols to offer, in preference order
    pub protocols: Vec<String>,
    /// Extensions to offer, in negotiation order
    pub extensions: Vec<Box<dyn ExtensionRequest>>,
    /// Reject inbound frames whose payload exceeds this many bytes
    pub max_payload_size: usize,
    /// Split outbound data messages into fragments of at most this many
    /// bytes; `None` sends each message as a single frame
    pub fragment_size: Option<usize>,
    /// Extra headers appended to the opening request
    pub extra_headers: Vec<(String, String)>,
    /// Optional hook inspecting the server's handshake response
    pub handshake_handler: Option<Arc<dyn HandshakeHandler>>,
    /// Time allowed for TCP connect plus the opening handshake
    pub open_timeout: Duration,
    /// Time the server gets to answer our CLOSE before the socket is dropped
    pub close_grace_period: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            protocols: Vec::new(),
            extensions: Vec::new(),
            max_payload_size: constants::DEFAULT_MAX_PAYLOAD_SIZE,
            fragment_size: None,
            extra_headers: Vec::new(),
            handshake_handler: None,
            open_timeout: constants::DEFAULT_OPEN_TIMEOUT,
            close_grace_period: constants::DEFAULT_CLOSE_GRACE_PERIOD,
        }
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("protocols", &self.protocols)
            .field(
                "extensions",
                &self.extensions.iter().map(|e| e.name()).collect::<Vec<_>>(),
            )
            .field("max_payload_size", &self.max_payload_size)
            .field("fragment_size", &self.fragment_size)
            .field("open_timeout", &self.open_timeout)
            .field("close_grace_period", &self.close_grace_period)
            .finish()
    }
}

impl SessionConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_payload_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_payload_size",
                value: "0".to_string(),
            }
            .into());
        }
        if self.fragment_size == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "fragment_size",
                value: "0".to_string(),
            }
            .into());
        }
        if self.open_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "open_timeout",
                value: "0".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Add a subprotocol to offer
    pub fn add_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Add an extension to offer
    pub fn add_extension(mut self, extension: impl ExtensionRequest + 'static) -> Self {
        self.extensions.push(Box::new(extension));
        self
    }

    /// Set the maximum inbound payload size
    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    /// Set the outbound fragment size
    pub fn fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = Some(size);
        self
    }

    /// Add an extra header to the opening request
    pub fn add_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    /// Install a handshake response hook
    pub fn handshake_handler(mut self, handler: Arc<dyn HandshakeHandler>) -> Self {
        self.handshake_handler = Some(handler);
        self
    }

    /// Set the open timeout
    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Set the close grace period
    pub fn close_grace_period(mut self, period: Duration) -> Self {
        self.close_grace_period = period;
        self
    }
}
