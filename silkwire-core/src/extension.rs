//! WebSocket extension framework (RFC 6455 section 9)
//!
//! An [`ExtensionRequest`] produces the offer carried in the opening
//! request's `Sec-WebSocket-Extensions` header and, when the server accepts,
//! builds the active [`Extension`]. Active extensions transform whole message
//! payloads: encode in negotiation order on send, decode in reverse order on
//! receive, claiming RSV bits to mark transformed messages.

use crate::error::Result;
use bytes::Bytes;
use std::fmt;

/// One `name[=value]` parameter of an extension header token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionParameter {
    /// Parameter name
    pub name: String,
    /// Parameter value, absent for bare flags
    pub value: Option<String>,
}

impl ExtensionParameter {
    /// Create a `name=value` parameter
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    /// Create a bare flag parameter
    pub fn flag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}

impl fmt::Display for ExtensionParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}={}", self.name, value),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Parse one `Sec-WebSocket-Extensions` header value into
/// `(extension_name, parameters)` entries.
///
/// Entries are comma-separated; within an entry, the extension name and its
/// parameters are separated by semicolons. Quoted parameter values are
/// unquoted.
pub fn parse_extension_header(value: &str) -> Vec<(String, Vec<ExtensionParameter>)> {
    let mut entries = Vec::new();
    for entry in value.split(',') {
        let mut tokens = entry.split(';').map(str::trim).filter(|t| !t.is_empty());
        let name = match tokens.next() {
            Some(name) => name.to_ascii_lowercase(),
            None => continue,
        };
        let params = tokens
            .map(|token| match token.split_once('=') {
                Some((k, v)) => ExtensionParameter::new(
                    k.trim().to_ascii_lowercase(),
                    v.trim().trim_matches('"'),
                ),
                None => ExtensionParameter::flag(token.to_ascii_lowercase()),
            })
            .collect();
        entries.push((name, params));
    }
    entries
}

/// An extension offer, carried in the opening request.
pub trait ExtensionRequest: Send + Sync {
    /// Extension token name, e.g. `permessage-deflate`
    fn name(&self) -> &str;

    /// Header token offered to the server, including parameters
    fn offer(&self) -> String;

    /// Build the active extension from the parameters the server accepted.
    /// Unknown or out-of-range parameters fail the handshake.
    fn accept(&self, params: &[ExtensionParameter]) -> Result<Box<dyn Extension>>;
}

/// A negotiated, active extension transforming message payloads.
pub trait Extension: Send {
    /// Extension token name
    fn name(&self) -> &str;

    /// Parameters as negotiated with the server
    fn parameters(&self) -> Vec<ExtensionParameter>;

    /// RSV bits this extension owns (`0b100` = RSV1). The frame decoder
    /// rejects inbound frames with set bits no extension claims.
    fn rsv_bits(&self) -> u8;

    /// Bound the size a decoded payload may reach. Decode must fail rather
    /// than produce more than `limit` bytes. Extensions whose transforms
    /// cannot expand a payload may ignore this.
    fn set_payload_limit(&mut self, _limit: usize) {}

    /// Transform an outbound message payload. Returns the replacement
    /// payload and the RSV bits to set on the message's first frame.
    fn encode(&mut self, payload: Bytes) -> Result<(Bytes, u8)>;

    /// Transform an inbound reassembled payload, reading the RSV bits of
    /// the message's first frame.
    fn decode(&mut self, payload: Bytes, rsv: u8) -> Result<Bytes>;
}

/// Negotiated metadata of an active extension, exposed on the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionInfo {
    /// Extension token name
    pub name: String,
    /// Negotiated parameters
    pub parameters: Vec<ExtensionParameter>,
}
