//! Per-message deflate extension (RFC 7692)
//!
//! Compresses outbound message payloads with raw DEFLATE and inflates
//! inbound ones, marking compressed messages with RSV1. The trailing empty
//! block (`00 00 FF FF`) every sync flush produces is stripped on the wire
//! and restored before inflating, per the RFC.

use crate::error::{ConfigError, Error, HandshakeError, Result};
use crate::extension::{Extension, ExtensionParameter, ExtensionRequest};
use crate::protocol::frame_bits::RSV1;
use bytes::Bytes;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

/// Extension token name
pub const EXTENSION_NAME: &str = "permessage-deflate";

const PARAM_SERVER_NO_CONTEXT_TAKEOVER: &str = "server_no_context_takeover";
const PARAM_CLIENT_NO_CONTEXT_TAKEOVER: &str = "client_no_context_takeover";
const PARAM_SERVER_MAX_WINDOW_BITS: &str = "server_max_window_bits";
const PARAM_CLIENT_MAX_WINDOW_BITS: &str = "client_max_window_bits";

/// Empty DEFLATE block appended by a sync flush
const TAIL: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

/// Controls when outbound payloads are worth compressing.
#[derive(Debug, Clone, Copy)]
pub struct CompressionStrategy {
    /// Payloads shorter than this pass through uncompressed
    pub min_size_in_bytes: usize,
}

impl Default for CompressionStrategy {
    fn default() -> Self {
        Self { min_size_in_bytes: 0 }
    }
}

/// Negotiated per-message deflate parameters.
#[derive(Debug, Clone, Copy)]
pub struct DeflateParams {
    /// LZ77 window bits of the client-to-server direction (8..=15)
    pub client_max_window_bits: u8,
    /// LZ77 window bits of the server-to-client direction (8..=15)
    pub server_max_window_bits: u8,
    /// Reset the compressor after every message
    pub client_no_context_takeover: bool,
    /// Reset the decompressor after every message
    pub server_no_context_takeover: bool,
}

impl Default for DeflateParams {
    fn default() -> Self {
        Self {
            client_max_window_bits: 15,
            server_max_window_bits: 15,
            client_no_context_takeover: false,
            server_no_context_takeover: false,
        }
    }
}

/// Offer for the per-message deflate extension.
///
/// Build one with [`DeflateRequest::builder`]; window bits outside 8..=15
/// are rejected at build time.
#[derive(Debug, Clone)]
pub struct DeflateRequest {
    params: DeflateParams,
    strategy: CompressionStrategy,
}

impl DeflateRequest {
    /// Start building a deflate offer
    pub fn builder() -> DeflateRequestBuilder {
        DeflateRequestBuilder::default()
    }
}

/// Builder for [`DeflateRequest`]
#[derive(Debug, Clone, Default)]
pub struct DeflateRequestBuilder {
    params: DeflateParams,
    strategy: CompressionStrategy,
}

impl DeflateRequestBuilder {
    /// Maximum window bits to offer for the client-to-server direction
    pub fn max_client_window_bits(mut self, bits: u8) -> Self {
        self.params.client_max_window_bits = bits;
        self
    }

    /// Maximum window bits to offer for the server-to-client direction
    pub fn max_server_window_bits(mut self, bits: u8) -> Self {
        self.params.server_max_window_bits = bits;
        self
    }

    /// Request that the server reset its compression context per message
    pub fn server_no_context_takeover(mut self, enabled: bool) -> Self {
        self.params.server_no_context_takeover = enabled;
        self
    }

    /// Offer to reset our compression context per message
    pub fn client_no_context_takeover(mut self, enabled: bool) -> Self {
        self.params.client_no_context_takeover = enabled;
        self
    }

    /// Set the compression strategy
    pub fn strategy(mut self, strategy: CompressionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Validate and build the request
    pub fn build(self) -> Result<DeflateRequest> {
        for bits in [
            self.params.client_max_window_bits,
            self.params.server_max_window_bits,
        ] {
            if !(8..=15).contains(&bits) {
                return Err(ConfigError::WindowBits(bits).into());
            }
        }
        Ok(DeflateRequest {
            params: self.params,
            strategy: self.strategy,
        })
    }
}

impl ExtensionRequest for DeflateRequest {
    fn name(&self) -> &str {
        EXTENSION_NAME
    }

    fn offer(&self) -> String {
        let mut offer = format!(
            "{}; {}={}; {}={}",
            EXTENSION_NAME,
            PARAM_CLIENT_MAX_WINDOW_BITS,
            self.params.client_max_window_bits,
            PARAM_SERVER_MAX_WINDOW_BITS,
            self.params.server_max_window_bits,
        );
        if self.params.client_no_context_takeover {
            offer.push_str("; ");
            offer.push_str(PARAM_CLIENT_NO_CONTEXT_TAKEOVER);
        }
        if self.params.server_no_context_takeover {
            offer.push_str("; ");
            offer.push_str(PARAM_SERVER_NO_CONTEXT_TAKEOVER);
        }
        offer
    }

    fn accept(&self, params: &[ExtensionParameter]) -> Result<Box<dyn Extension>> {
        let mut negotiated = self.params;
        for param in params {
            match param.name.as_str() {
                PARAM_SERVER_NO_CONTEXT_TAKEOVER => negotiated.server_no_context_takeover = true,
                PARAM_CLIENT_NO_CONTEXT_TAKEOVER => negotiated.client_no_context_takeover = true,
                PARAM_SERVER_MAX_WINDOW_BITS => {
                    negotiated.server_max_window_bits = parse_window_bits(param)?;
                }
                PARAM_CLIENT_MAX_WINDOW_BITS => {
                    // A bare token in the response keeps our offered value.
                    if param.value.is_some() {
                        negotiated.client_max_window_bits = parse_window_bits(param)?;
                    }
                }
                other => {
                    return Err(HandshakeError::ExtensionNegotiation(format!(
                        "unknown parameter: {other}"
                    ))
                    .into());
                }
            }
        }
        Ok(Box::new(PerMessageDeflate::new(negotiated, self.strategy)))
    }
}

fn parse_window_bits(param: &ExtensionParameter) -> Result<u8> {
    let bits = param
        .value
        .as_deref()
        .and_then(|v| v.parse::<u8>().ok())
        .ok_or_else(|| {
            HandshakeError::ExtensionNegotiation(format!("malformed parameter: {param}"))
        })?;
    if !(8..=15).contains(&bits) {
        return Err(HandshakeError::ExtensionNegotiation(format!(
            "window bits out of range: {bits}"
        ))
        .into());
    }
    Ok(bits)
}

/// Active per-message deflate codec.
///
/// Inflation is capped by the payload limit installed through
/// [`Extension::set_payload_limit`]; a compressed message that would expand
/// past it fails decode instead of allocating.
pub struct PerMessageDeflate {
    params: DeflateParams,
    strategy: CompressionStrategy,
    compressor: Compress,
    decompressor: Decompress,
    max_inflated_size: usize,
}

impl std::fmt::Debug for PerMessageDeflate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerMessageDeflate")
            .field("params", &self.params)
            .field("strategy", &self.strategy)
            .finish()
    }
}

impl PerMessageDeflate {
    /// Create a codec from negotiated parameters.
    pub fn new(params: DeflateParams, strategy: CompressionStrategy) -> Self {
        Self {
            params,
            strategy,
            // zlib rejects raw streams with a 256-byte window; 8 is
            // negotiated on the wire but coded at 9.
            compressor: Compress::new_with_window_bits(
                Compression::default(),
                false,
                params.client_max_window_bits.max(9),
            ),
            decompressor: Decompress::new_with_window_bits(
                false,
                params.server_max_window_bits.max(9),
            ),
            max_inflated_size: usize::MAX,
        }
    }

    /// Negotiated parameters
    pub fn params(&self) -> DeflateParams {
        self.params
    }

    fn compress(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::with_capacity(input.len() / 2 + 32);
        let before_in = self.compressor.total_in();
        while ((self.compressor.total_in() - before_in) as usize) < input.len() {
            let offset = (self.compressor.total_in() - before_in) as usize;
            self.compressor
                .compress_vec(&input[offset..], &mut output, FlushCompress::None)
                .map_err(|e| Error::Compression(e.to_string()))?;
            if output.len() == output.capacity() {
                output.reserve(4096);
            }
        }
        // A sync flush drains everything buffered and terminates with the
        // empty block; spare output capacity after the call means the flush
        // is complete.
        loop {
            output.reserve(64);
            self.compressor
                .compress_vec(&[], &mut output, FlushCompress::Sync)
                .map_err(|e| Error::Compression(e.to_string()))?;
            if output.len() < output.capacity() {
                break;
            }
        }
        if output.ends_with(&TAIL) {
            output.truncate(output.len() - TAIL.len());
        }
        Ok(output)
    }

    fn decompress(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let mut input = Vec::with_capacity(data.len() + TAIL.len());
        input.extend_from_slice(data);
        input.extend_from_slice(&TAIL);

        let mut output = Vec::with_capacity((2 * data.len() + 16).min(self.max_inflated_size));
        let before_in = self.decompressor.total_in();
        while ((self.decompressor.total_in() - before_in) as usize) < input.len() {
            let offset = (self.decompressor.total_in() - before_in) as usize;
            let status = self
                .decompressor
                .decompress_vec(&input[offset..], &mut output, FlushDecompress::None)
                .map_err(|e| Error::Compression(e.to_string()))?;
            // A tiny compressed payload may inflate without bound; stop the
            // moment the output passes the configured ceiling.
            if output.len() > self.max_inflated_size {
                return Err(Error::PayloadOverflow {
                    size: output.len() as u64,
                    limit: self.max_inflated_size,
                });
            }
            match status {
                Status::Ok | Status::BufError => output.reserve(2 * input.len().max(64)),
                Status::StreamEnd => break,
            }
        }
        Ok(output)
    }
}

impl Extension for PerMessageDeflate {
    fn name(&self) -> &str {
        EXTENSION_NAME
    }

    fn parameters(&self) -> Vec<ExtensionParameter> {
        let mut params = vec![
            ExtensionParameter::new(
                PARAM_CLIENT_MAX_WINDOW_BITS,
                self.params.client_max_window_bits.to_string(),
            ),
            ExtensionParameter::new(
                PARAM_SERVER_MAX_WINDOW_BITS,
                self.params.server_max_window_bits.to_string(),
            ),
        ];
        if self.params.client_no_context_takeover {
            params.push(ExtensionParameter::flag(PARAM_CLIENT_NO_CONTEXT_TAKEOVER));
        }
        if self.params.server_no_context_takeover {
            params.push(ExtensionParameter::flag(PARAM_SERVER_NO_CONTEXT_TAKEOVER));
        }
        params
    }

    fn rsv_bits(&self) -> u8 {
        RSV1
    }

    fn set_payload_limit(&mut self, limit: usize) {
        self.max_inflated_size = limit;
    }

    fn encode(&mut self, payload: Bytes) -> Result<(Bytes, u8)> {
        if payload.len() < self.strategy.min_size_in_bytes {
            return Ok((payload, 0));
        }
        let compressed = self.compress(&payload)?;
        if self.params.client_no_context_takeover {
            self.compressor.reset();
        }
        Ok((compressed.into(), RSV1))
    }

    fn decode(&mut self, payload: Bytes, rsv: u8) -> Result<Bytes> {
        if rsv & RSV1 == 0 {
            return Ok(payload);
        }
        let inflated = self.decompress(&payload)?;
        if self.params.server_no_context_takeover {
            self.decompressor.reset(false);
        }
        Ok(inflated.into())
    }
}
