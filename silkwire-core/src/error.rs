//! Error types for Silkwire
//!
//! This module defines all error types used throughout the Silkwire library.
//! The taxonomy mirrors how failures surface to the caller: handshake and
//! transport errors fail the open call, protocol violations close the
//! session with a close code, configuration errors fail fast.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for Silkwire operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for Silkwire operations
#[derive(Error, Debug)]
pub enum Error {
    /// Opening handshake failed; the socket has been closed
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Peer violated the WebSocket protocol
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// Inbound frame payload exceeded the configured limit
    #[error("inbound payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadOverflow {
        /// Declared payload length of the offending frame
        size: u64,
        /// Configured maximum payload size
        limit: usize,
    },

    /// I/O errors from the underlying transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Compression or decompression failure
    #[error("compression error: {0}")]
    Compression(String),

    /// Open did not complete within the configured timeout
    #[error("open timed out after {0:?}")]
    OpenTimeout(Duration),

    /// Operation attempted on a session that is not open
    #[error("connection is not open")]
    NotOpen,

    /// Operation attempted on a destroyed factory
    #[error("factory is already destroyed")]
    Destroyed,

    /// A partial message writer is already open on this session
    #[error("another partial message writer is still open")]
    WriterBusy,

    /// A partial message writer was used after its final fragment
    #[error("partial message writer already finished")]
    WriterFinished,
}

impl Error {
    /// Close code carried by the CLOSE frame sent in response to this error.
    pub fn close_code(&self) -> u16 {
        match self {
            Error::PayloadOverflow { .. } => close_code::MESSAGE_TOO_BIG,
            _ => close_code::PROTOCOL_ERROR,
        }
    }
}

/// Opening handshake failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Response status line was not `HTTP/1.1 101`
    #[error("unexpected status line: {0}")]
    UnexpectedStatus(String),

    /// A required header was absent
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    /// A header carried an unacceptable value
    #[error("invalid value for {header}: {value}")]
    InvalidHeader {
        /// Header name (lowercase)
        header: &'static str,
        /// Received value
        value: String,
    },

    /// `Sec-WebSocket-Accept` did not match the computed digest
    #[error("accept key mismatch: expected {expected}, received {received}")]
    AcceptMismatch {
        /// Digest computed from our nonce
        expected: String,
        /// Value the server sent
        received: String,
    },

    /// Server selected a subprotocol we never offered
    #[error("server selected unrequested subprotocol: {0}")]
    UnrequestedProtocol(String),

    /// Subprotocols were offered but the server selected none
    #[error("server did not select any offered subprotocol")]
    MissingSubprotocol,

    /// Server enabled an extension we never offered, or with bad parameters
    #[error("extension negotiation failed: {0}")]
    ExtensionNegotiation(String),

    /// The user-supplied handshake handler rejected the response
    #[error("response rejected by handshake handler")]
    RejectedByHandler,

    /// Response headers could not be parsed as HTTP
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Response header section exceeded the size limit
    #[error("response header section too large")]
    ResponseTooLarge,
}

/// Inbound frame and message violations of RFC 6455
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// Opcode outside the RFC 6455 table
    #[error("reserved opcode 0x{0:x}")]
    ReservedOpcode(u8),

    /// RSV bits set that no negotiated extension owns
    #[error("reserved bits set: 0b{0:03b}")]
    ReservedBits(u8),

    /// Server-to-client frame carried the mask bit
    #[error("masked frame from server")]
    MaskedFrame,

    /// Control frame with fin=0
    #[error("fragmented control frame")]
    FragmentedControlFrame,

    /// Control frame payload longer than 125 bytes
    #[error("control frame payload of {0} bytes")]
    OversizedControlFrame(usize),

    /// CONTINUATION frame with no message in progress
    #[error("continuation frame without a message in progress")]
    UnexpectedContinuation,

    /// New data frame while a fragmented message is still open
    #[error("data frame interleaved into a fragmented message")]
    InterleavedMessage,

    /// TEXT message payload was not valid UTF-8
    #[error("invalid UTF-8 in text message")]
    InvalidUtf8,

    /// CLOSE frame payload of exactly one byte
    #[error("close frame with a 1-byte payload")]
    InvalidClosePayload,
}

/// Configuration errors, surfaced synchronously at build time
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Deflate window bits outside the negotiable range
    #[error("window bits must be within 8..=15, got {0}")]
    WindowBits(u8),

    /// Invalid configuration value
    #[error("invalid configuration value for {field}: {value}")]
    InvalidValue {
        /// Configuration field name
        field: &'static str,
        /// Rejected value
        value: String,
    },

    /// URI could not be used for a WebSocket session
    #[error("invalid WebSocket URI: {0}")]
    InvalidUri(String),
}

/// WebSocket close codes used by this library (RFC 6455 section 7.4.1)
pub mod close_code {
    /// Normal closure
    pub const NORMAL_CLOSURE: u16 = 1000;

    /// Endpoint is going away
    pub const GOING_AWAY: u16 = 1001;

    /// Protocol error
    pub const PROTOCOL_ERROR: u16 = 1002;

    /// Received a data type it cannot accept
    pub const UNSUPPORTED_DATA: u16 = 1003;

    /// No status code was present (never sent on the wire)
    pub const NO_STATUS: u16 = 1005;

    /// Connection dropped without a close frame (never sent on the wire)
    pub const ABNORMAL_CLOSURE: u16 = 1006;

    /// Message payload inconsistent with its type
    pub const INVALID_PAYLOAD: u16 = 1007;

    /// Policy violation
    pub const POLICY_VIOLATION: u16 = 1008;

    /// Message too big to process
    pub const MESSAGE_TOO_BIG: u16 = 1009;

    /// Server did not negotiate a required extension
    pub const MANDATORY_EXTENSION: u16 = 1010;

    /// Server encountered an unexpected condition
    pub const INTERNAL_ERROR: u16 = 1011;
}
