//! WebSocket opening handshake (RFC 6455 section 4)
//!
//! [`Handshake`] builds the client Upgrade request and incrementally parses
//! the server's response from the inbound byte stream. Bytes received past
//! the header terminator belong to the frame layer and are handed back with
//! [`HandshakeProgress::Complete`].

use crate::error::{HandshakeError, Result};
use crate::extension::{parse_extension_header, Extension, ExtensionRequest};
use crate::protocol::{accept_for, constants, generate_key, header};
use bytes::BytesMut;
use url::Url;

/// Parsed server response to the opening request, offered to the optional
/// user hook before the session opens.
#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    /// HTTP status code
    pub status: u16,
    /// Headers with lowercased names, in received order
    pub headers: Vec<(String, String)>,
}

impl HandshakeResponse {
    /// First value of `name` (lowercase), if present
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// All values of `name` (lowercase)
    pub fn header_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.headers
            .iter()
            .filter(move |(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Subprotocol the server selected, if any
    pub fn protocol(&self) -> Option<&str> {
        self.header(header::SEC_WEBSOCKET_PROTOCOL)
    }
}

/// User hook inspecting the server response. Returning `false` fails the
/// handshake regardless of the built-in validation.
pub trait HandshakeHandler: Send + Sync {
    /// Accept or reject the validated response
    fn on_response(&self, response: &HandshakeResponse) -> bool;
}

/// Outcome of the negotiation carried by a successful handshake.
pub struct Negotiated {
    /// Subprotocol the server selected
    pub protocol: Option<String>,
    /// Active extensions, in negotiation order
    pub extensions: Vec<Box<dyn Extension>>,
}

impl std::fmt::Debug for Negotiated {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiated")
            .field("protocol", &self.protocol)
            .field(
                "extensions",
                &self.extensions.iter().map(|e| e.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Progress of the response parse.
#[derive(Debug)]
pub enum HandshakeProgress {
    /// The header terminator has not arrived yet
    NeedMore,
    /// Handshake complete; `remaining` holds bytes past the terminator
    Complete {
        /// Negotiation outcome
        negotiated: Negotiated,
        /// First bytes of the frame stream
        remaining: BytesMut,
    },
}

/// Client side of one opening handshake.
///
/// Holds the request parameters by reference; the caller keeps the session
/// configuration alive for the duration of the handshake.
pub struct Handshake<'a> {
    uri: &'a Url,
    key: String,
    protocols: &'a [String],
    extensions: &'a [Box<dyn ExtensionRequest>],
    extra_headers: &'a [(String, String)],
    handler: Option<&'a dyn HandshakeHandler>,
    buf: BytesMut,
}

impl std::fmt::Debug for Handshake<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("uri", &self.uri.as_str())
            .field("key", &self.key)
            .field("buffered", &self.buf.len())
            .finish()
    }
}

impl<'a> Handshake<'a> {
    /// Create a handshake for `uri`, generating a fresh nonce.
    pub fn new(
        uri: &'a Url,
        protocols: &'a [String],
        extensions: &'a [Box<dyn ExtensionRequest>],
        extra_headers: &'a [(String, String)],
        handler: Option<&'a dyn HandshakeHandler>,
    ) -> Self {
        Self {
            uri,
            key: generate_key(),
            protocols,
            extensions,
            extra_headers,
            handler,
            buf: BytesMut::new(),
        }
    }

    /// The `Sec-WebSocket-Key` this handshake sent
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Serialize the opening HTTP request.
    pub fn request_bytes(&self) -> Vec<u8> {
        let path = match self.uri.query() {
            Some(query) => format!("{}?{}", self.uri.path(), query),
            None => self.uri.path().to_string(),
        };
        let host = self.uri.host_str().unwrap_or_default();
        let mut request = format!("GET {} HTTP/1.1\r\n", path);
        match self.uri.port() {
            Some(port) => request.push_str(&format!("Host: {}:{}\r\n", host, port)),
            None => request.push_str(&format!("Host: {}\r\n", host)),
        }
        request.push_str("Upgrade: websocket\r\n");
        request.push_str("Connection: Upgrade\r\n");
        request.push_str(&format!("Sec-WebSocket-Key: {}\r\n", self.key));
        request.push_str(&format!(
            "Sec-WebSocket-Version: {}\r\n",
            constants::WEBSOCKET_VERSION
        ));
        if !self.protocols.is_empty() {
            request.push_str(&format!(
                "Sec-WebSocket-Protocol: {}\r\n",
                self.protocols.join(", ")
            ));
        }
        if !self.extensions.is_empty() {
            let offers: Vec<String> = self.extensions.iter().map(|e| e.offer()).collect();
            request.push_str(&format!("Sec-WebSocket-Extensions: {}\r\n", offers.join(", ")));
        }
        for (name, value) in self.extra_headers {
            request.push_str(&format!("{}: {}\r\n", name, value));
        }
        request.push_str("\r\n");
        request.into_bytes()
    }

    /// Feed a chunk of the inbound stream. Returns `NeedMore` until the
    /// response header section is complete, then validates it and hands back
    /// any surplus bytes.
    pub fn on_data(&mut self, chunk: &[u8]) -> Result<HandshakeProgress> {
        self.buf.extend_from_slice(chunk);

        let end = match find_terminator(&self.buf) {
            Some(end) => end,
            None => {
                if self.buf.len() > constants::MAX_HEADER_SIZE {
                    return Err(HandshakeError::ResponseTooLarge.into());
                }
                return Ok(HandshakeProgress::NeedMore);
            }
        };

        let head = self.buf.split_to(end + 4);
        let remaining = self.buf.split();
        let response = parse_response(&head[..end])?;
        let negotiated = self.validate(&response)?;
        Ok(HandshakeProgress::Complete {
            negotiated,
            remaining,
        })
    }

    fn validate(&self, response: &HandshakeResponse) -> Result<Negotiated> {
        if response.status != 101 {
            return Err(HandshakeError::UnexpectedStatus(format!(
                "HTTP {}",
                response.status
            ))
            .into());
        }

        let upgrade = response
            .header(header::UPGRADE)
            .ok_or(HandshakeError::MissingHeader("upgrade"))?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(HandshakeError::InvalidHeader {
                header: "upgrade",
                value: upgrade.to_string(),
            }
            .into());
        }

        let connection = response
            .header(header::CONNECTION)
            .ok_or(HandshakeError::MissingHeader("connection"))?;
        let upgraded = connection
            .split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
        if !upgraded {
            return Err(HandshakeError::InvalidHeader {
                header: "connection",
                value: connection.to_string(),
            }
            .into());
        }

        let accept = response
            .header(header::SEC_WEBSOCKET_ACCEPT)
            .ok_or(HandshakeError::MissingHeader("sec-websocket-accept"))?;
        let expected = accept_for(&self.key);
        if accept != expected {
            return Err(HandshakeError::AcceptMismatch {
                expected,
                received: accept.to_string(),
            }
            .into());
        }

        let protocol = match response.protocol() {
            Some(selected) => {
                if !self.protocols.iter().any(|p| p == selected) {
                    return Err(HandshakeError::UnrequestedProtocol(selected.to_string()).into());
                }
                Some(selected.to_string())
            }
            None => {
                // An offer the server ignored fails the handshake, unless a
                // user hook is installed to make that call itself.
                if !self.protocols.is_empty() && self.handler.is_none() {
                    return Err(HandshakeError::MissingSubprotocol.into());
                }
                None
            }
        };

        let mut extensions = Vec::new();
        for value in response.header_all(header::SEC_WEBSOCKET_EXTENSIONS) {
            for (name, params) in parse_extension_header(value) {
                let request = self
                    .extensions
                    .iter()
                    .find(|r| r.name() == name)
                    .ok_or_else(|| {
                        HandshakeError::ExtensionNegotiation(format!(
                            "server enabled unrequested extension: {name}"
                        ))
                    })?;
                extensions.push(request.accept(&params)?);
            }
        }

        if let Some(handler) = self.handler {
            if !handler.on_response(response) {
                return Err(HandshakeError::RejectedByHandler.into());
            }
        }

        Ok(Negotiated {
            protocol,
            extensions,
        })
    }
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_response(head: &[u8]) -> Result<HandshakeResponse> {
    let text = std::str::from_utf8(head)
        .map_err(|_| HandshakeError::Malformed("non-ASCII response header".to_string()))?;
    let mut lines = text.split("\r\n");

    let status_line = lines
        .next()
        .ok_or_else(|| HandshakeError::Malformed("empty response".to_string()))?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts
        .next()
        .ok_or_else(|| HandshakeError::Malformed("missing HTTP version".to_string()))?;
    if version != "HTTP/1.1" {
        return Err(HandshakeError::UnexpectedStatus(status_line.to_string()).into());
    }
    let status = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| HandshakeError::Malformed("missing status code".to_string()))?;

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line.split_once(':').ok_or_else(|| {
            HandshakeError::Malformed(format!("header line without colon: {line}"))
        })?;
        headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
    }

    Ok(HandshakeResponse { status, headers })
}
