//! WebSocket frame parsing and serialization
//!
//! This module implements both directions of the RFC 6455 framing layer for
//! a client endpoint: [`FrameEncoder`] builds masked outbound frames and
//! fragments data messages, [`FrameDecoder`] incrementally parses the inbound
//! byte stream into unmasked frames, enforcing the protocol rules along the
//! way.

use crate::error::{Error, ProtocolViolation, Result};
use crate::protocol::{constants, frame_bits::*, Opcode};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// A single parsed inbound frame.
///
/// Client-side decoding never yields masked frames; a mask bit from the
/// server is rejected before a `Frame` is produced.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Final frame of its message
    pub fin: bool,
    /// RSV1..RSV3 packed into the low three bits (`0b100` = RSV1)
    pub rsv: u8,
    /// Frame opcode
    pub opcode: Opcode,
    /// Payload data
    pub payload: Bytes,
}

impl Frame {
    /// Whether RSV1 is set
    pub fn rsv1(&self) -> bool {
        self.rsv & RSV1 != 0
    }

    /// Check if this is a control frame
    pub fn is_control(&self) -> bool {
        self.opcode.is_control()
    }
}

/// XOR `data` in place with the 4-byte masking key.
pub fn apply_mask(data: &mut [u8], key: &[u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Builds masked client-to-server frames.
///
/// Data messages are fragmented at `fragment_size` when one is configured;
/// all fragments of a message land in a single output buffer so the write
/// queue can transmit them atomically.
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    fragment_size: Option<usize>,
}

impl FrameEncoder {
    /// Create an encoder. `fragment_size` of `None` sends each data message
    /// as a single frame.
    pub fn new(fragment_size: Option<usize>) -> Self {
        Self { fragment_size }
    }

    /// Encode a complete data message, fragmenting if configured.
    /// `rsv` carries the bits set by the send-side extensions and is only
    /// written on the first fragment.
    pub fn message(&self, opcode: Opcode, payload: &[u8], rsv: u8) -> Bytes {
        let chunk = match self.fragment_size {
            Some(size) if size > 0 && payload.len() > size => size,
            _ => {
                let mut buf = BytesMut::with_capacity(payload.len() + 14);
                write_frame(&mut buf, true, rsv, opcode, payload);
                return buf.freeze();
            }
        };

        let mut buf = BytesMut::with_capacity(payload.len() + 14 * (payload.len() / chunk + 1));
        let mut offset = 0;
        let mut first = true;
        while offset < payload.len() {
            let end = usize::min(offset + chunk, payload.len());
            let fin = end == payload.len();
            let op = if first { opcode } else { Opcode::Continuation };
            let bits = if first { rsv } else { 0 };
            write_frame(&mut buf, fin, bits, op, &payload[offset..end]);
            offset = end;
            first = false;
        }
        buf.freeze()
    }

    /// Encode one explicit fragment, used by the partial message writer.
    pub fn fragment(&self, opcode: Opcode, payload: &[u8], fin: bool) -> Bytes {
        let mut buf = BytesMut::with_capacity(payload.len() + 14);
        write_frame(&mut buf, fin, 0, opcode, payload);
        buf.freeze()
    }

    /// Encode a control frame. Control payloads are capped at 125 bytes and
    /// never fragmented.
    pub fn control(&self, opcode: Opcode, payload: &[u8]) -> Bytes {
        debug_assert!(opcode.is_control());
        let payload = &payload[..payload.len().min(constants::MAX_CONTROL_PAYLOAD)];
        let mut buf = BytesMut::with_capacity(payload.len() + 6);
        write_frame(&mut buf, true, 0, opcode, payload);
        buf.freeze()
    }

    /// Encode a CLOSE frame carrying `code` and as much of `reason` as fits.
    pub fn close(&self, code: u16, reason: &str) -> Bytes {
        let mut limit = reason.len().min(constants::MAX_CLOSE_REASON);
        while !reason.is_char_boundary(limit) {
            limit -= 1;
        }
        let mut payload = Vec::with_capacity(2 + limit);
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(&reason.as_bytes()[..limit]);
        self.control(Opcode::Close, &payload)
    }
}

fn write_frame(buf: &mut BytesMut, fin: bool, rsv: u8, opcode: Opcode, payload: &[u8]) {
    buf.put_u8(((fin as u8) << 7) | (rsv << 4) | opcode.value());

    let len = payload.len();
    if len < PAYLOAD_LEN_16 as usize {
        buf.put_u8(MASK_BIT | len as u8);
    } else if len <= u16::MAX as usize {
        buf.put_u8(MASK_BIT | PAYLOAD_LEN_16);
        buf.put_u16(len as u16);
    } else {
        buf.put_u8(MASK_BIT | PAYLOAD_LEN_64);
        buf.put_u64(len as u64);
    }

    let key = crate::random::mask_key();
    buf.put_slice(&key);
    let start = buf.len();
    buf.put_slice(payload);
    apply_mask(&mut buf[start..], &key);
}

/// Incremental decoder for the server-to-client frame stream.
///
/// Bytes arrive in arbitrary chunks via [`FrameDecoder::feed`]; `next`
/// yields a frame once a complete one is buffered. The header is parsed and
/// validated as soon as it is complete so oversized or malformed frames are
/// rejected before their payload arrives.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    pending: Option<PendingHeader>,
    max_payload: usize,
    rsv_mask: u8,
}

#[derive(Debug, Clone, Copy)]
struct PendingHeader {
    fin: bool,
    rsv: u8,
    opcode: Opcode,
    len: usize,
}

impl FrameDecoder {
    /// Create a decoder rejecting payloads larger than `max_payload`.
    pub fn new(max_payload: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            pending: None,
            max_payload,
            rsv_mask: 0,
        }
    }

    /// Declare which RSV bits negotiated extensions own. Any other set bit
    /// is a protocol violation.
    pub fn set_rsv_mask(&mut self, mask: u8) {
        self.rsv_mask = mask & 0b111;
    }

    /// Append a chunk of the inbound byte stream.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of bytes currently buffered
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Try to extract the next complete frame. Returns `Ok(None)` when more
    /// bytes are needed.
    pub fn next(&mut self) -> Result<Option<Frame>> {
        if self.pending.is_none() {
            match self.parse_header()? {
                Some(header) => self.pending = Some(header),
                None => return Ok(None),
            }
        }

        let header = match self.pending {
            Some(h) => h,
            None => return Ok(None),
        };
        if self.buf.len() < header.len {
            return Ok(None);
        }

        self.pending = None;
        let payload = self.buf.split_to(header.len).freeze();
        Ok(Some(Frame {
            fin: header.fin,
            rsv: header.rsv,
            opcode: header.opcode,
            payload,
        }))
    }

    fn parse_header(&mut self) -> Result<Option<PendingHeader>> {
        if self.buf.len() < 2 {
            return Ok(None);
        }

        let b0 = self.buf[0];
        let b1 = self.buf[1];
        let len7 = b1 & PAYLOAD_LEN_MASK;

        let header_len = match len7 {
            PAYLOAD_LEN_16 => 4,
            PAYLOAD_LEN_64 => 10,
            _ => 2,
        };
        if self.buf.len() < header_len {
            return Ok(None);
        }

        // The mask bit is checked before anything else: a masked frame from
        // the server invalidates the whole stream.
        if b1 & MASK_BIT != 0 {
            return Err(ProtocolViolation::MaskedFrame.into());
        }

        let fin = b0 & FIN_BIT != 0;
        let rsv = (b0 >> 4) & 0b111;
        let opcode = Opcode::from_u8(b0 & OPCODE_MASK)
            .ok_or(ProtocolViolation::ReservedOpcode(b0 & OPCODE_MASK))?;

        if rsv != 0 && (opcode.is_control() || rsv & !self.rsv_mask != 0) {
            return Err(ProtocolViolation::ReservedBits(rsv).into());
        }

        let len = match len7 {
            PAYLOAD_LEN_16 => u64::from(u16::from_be_bytes([self.buf[2], self.buf[3]])),
            PAYLOAD_LEN_64 => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&self.buf[2..10]);
                let len = u64::from_be_bytes(bytes);
                if len > i64::MAX as u64 {
                    // RFC 6455: the most significant bit of the 64-bit
                    // length must be 0.
                    return Err(Error::PayloadOverflow {
                        size: len,
                        limit: self.max_payload,
                    });
                }
                len
            }
            n => u64::from(n),
        };

        if opcode.is_control() {
            if !fin {
                return Err(ProtocolViolation::FragmentedControlFrame.into());
            }
            if len > constants::MAX_CONTROL_PAYLOAD as u64 {
                return Err(ProtocolViolation::OversizedControlFrame(len as usize).into());
            }
        }

        if len > self.max_payload as u64 {
            return Err(Error::PayloadOverflow {
                size: len,
                limit: self.max_payload,
            });
        }

        self.buf.advance(header_len);
        Ok(Some(PendingHeader {
            fin,
            rsv,
            opcode,
            len: len as usize,
        }))
    }
}
