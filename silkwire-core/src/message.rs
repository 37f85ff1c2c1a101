//! Message assembly for fragmented WebSocket messages
//!
//! A message is one TEXT or BINARY frame followed by zero or more
//! CONTINUATION frames, delimited by fin=1 on the last one. Control frames
//! are dispatched by the session before they ever reach the assembler, so
//! assembly state survives interleaved pings and pongs untouched.

use crate::error::{Error, ProtocolViolation, Result};
use crate::frame::Frame;
use crate::protocol::Opcode;
use bytes::BytesMut;

/// A complete inbound message, delivered to the user handler after
/// extension decoding and (for text) UTF-8 validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// UTF-8 text message
    Text(String),
    /// Binary message
    Binary(bytes::Bytes),
}

/// Payload of a fully reassembled message, before extension decoding.
#[derive(Debug)]
pub struct AssembledMessage {
    /// Opcode of the first frame (TEXT or BINARY)
    pub opcode: Opcode,
    /// Concatenated fragment payloads
    pub payload: BytesMut,
    /// RSV bits of the first frame (extensions read these)
    pub rsv: u8,
}

/// Accumulates data frames into messages.
///
/// The frame decoder bounds each frame's payload on its own; the assembler
/// bounds the reassembled total, so a message fragmented into many small
/// frames cannot grow past the same limit.
#[derive(Debug)]
pub struct MessageAssembler {
    opcode: Option<Opcode>,
    payload: BytesMut,
    rsv: u8,
    max_payload: usize,
}

impl MessageAssembler {
    /// Create an assembler rejecting messages whose reassembled payload
    /// exceeds `max_payload` bytes.
    pub fn new(max_payload: usize) -> Self {
        Self {
            opcode: None,
            payload: BytesMut::new(),
            rsv: 0,
            max_payload,
        }
    }

    /// Whether a fragmented message is currently open
    pub fn in_progress(&self) -> bool {
        self.opcode.is_some()
    }

    fn check_capacity(&self, incoming: usize) -> Result<()> {
        let total = self.payload.len() as u64 + incoming as u64;
        if total > self.max_payload as u64 {
            return Err(Error::PayloadOverflow {
                size: total,
                limit: self.max_payload,
            });
        }
        Ok(())
    }

    /// Feed one data frame. Returns the reassembled message when `frame`
    /// completes one.
    ///
    /// The caller routes control frames elsewhere; pushing one here is a
    /// programming error.
    pub fn push(&mut self, frame: Frame) -> Result<Option<AssembledMessage>> {
        debug_assert!(!frame.opcode.is_control());

        match frame.opcode {
            Opcode::Text | Opcode::Binary => {
                if self.opcode.is_some() {
                    return Err(ProtocolViolation::InterleavedMessage.into());
                }
                self.check_capacity(frame.payload.len())?;
                self.opcode = Some(frame.opcode);
                self.rsv = frame.rsv;
                self.payload.extend_from_slice(&frame.payload);
            }
            Opcode::Continuation => {
                if self.opcode.is_none() {
                    return Err(ProtocolViolation::UnexpectedContinuation.into());
                }
                // Only the first frame of a message may carry RSV bits.
                if frame.rsv != 0 {
                    return Err(ProtocolViolation::ReservedBits(frame.rsv).into());
                }
                self.check_capacity(frame.payload.len())?;
                self.payload.extend_from_slice(&frame.payload);
            }
            _ => unreachable!("control frame in assembler"),
        }

        if !frame.fin {
            return Ok(None);
        }

        let opcode = self.opcode.take().unwrap_or(Opcode::Binary);
        let payload = std::mem::take(&mut self.payload);
        let rsv = std::mem::take(&mut self.rsv);
        Ok(Some(AssembledMessage {
            opcode,
            payload,
            rsv,
        }))
    }
}
