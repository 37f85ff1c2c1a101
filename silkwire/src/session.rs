//! WebSocket session
//!
//! [`WebSocket`] is the user-facing handle to one open session. The shared
//! state behind it is fed inbound frames by the reader task and outbound
//! commands by any user thread; the write queue linearizes the sends.
//!
//! Closing follows the two-step discipline of RFC 6455: `close` sends a
//! CLOSE frame and waits (bounded by the close grace period) for the
//! server's reply before the socket is dropped; `close_now` skips the
//! closing handshake entirely. However the session ends, the handler's
//! `on_close` fires exactly once.

use crate::connection::WriteCommand;
use crate::handler::EventHandler;
use crate::reactor::{ReactorHandle, ScheduledTask};
use bytes::Bytes;
use silkwire_core::error::{close_code, Error, ProtocolViolation};
use silkwire_core::extension::{Extension, ExtensionInfo};
use silkwire_core::log;
use silkwire_core::message::{AssembledMessage, MessageAssembler};
use silkwire_core::{FrameDecoder, FrameEncoder, Opcode, Result};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::AbortHandle;
use url::Url;

const TAG: &str = "session";

const STATE_OPEN: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Kind of a partially written message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// UTF-8 text message
    Text,
    /// Binary message
    Binary,
}

impl MessageKind {
    fn opcode(self) -> Opcode {
        match self {
            MessageKind::Text => Opcode::Text,
            MessageKind::Binary => Opcode::Binary,
        }
    }
}

pub(crate) struct SessionInner {
    uri: Url,
    handler: Arc<dyn EventHandler>,
    reactor: ReactorHandle,
    queue: UnboundedSender<WriteCommand>,
    encoder: FrameEncoder,
    extensions: Mutex<Vec<Box<dyn Extension>>>,
    extension_info: Vec<ExtensionInfo>,
    protocol: Option<String>,
    close_grace_period: Duration,

    state: AtomicU8,
    close_sent: AtomicBool,
    closed_fired: AtomicBool,
    partial_open: AtomicBool,
    ping_deadline: Mutex<Option<ScheduledTask>>,
    close_grace: Mutex<Option<ScheduledTask>>,
    reader_abort: Mutex<Option<AbortHandle>>,
}

fn lock<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionInner {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        uri: Url,
        handler: Arc<dyn EventHandler>,
        reactor: ReactorHandle,
        queue: UnboundedSender<WriteCommand>,
        protocol: Option<String>,
        extensions: Vec<Box<dyn Extension>>,
        fragment_size: Option<usize>,
        close_grace_period: Duration,
    ) -> Self {
        let extension_info = extensions
            .iter()
            .map(|e| ExtensionInfo {
                name: e.name().to_string(),
                parameters: e.parameters(),
            })
            .collect();
        Self {
            uri,
            handler,
            reactor,
            queue,
            encoder: FrameEncoder::new(fragment_size),
            extensions: Mutex::new(extensions),
            extension_info,
            protocol,
            close_grace_period,
            state: AtomicU8::new(STATE_OPEN),
            close_sent: AtomicBool::new(false),
            closed_fired: AtomicBool::new(false),
            partial_open: AtomicBool::new(false),
            ping_deadline: Mutex::new(None),
            close_grace: Mutex::new(None),
            reader_abort: Mutex::new(None),
        }
    }

    pub(crate) fn set_reader_abort(&self, handle: AbortHandle) {
        *lock(&self.reader_abort) = Some(handle);
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_OPEN
    }

    fn advance_state(&self, state: u8) {
        // Lifecycle is one-way; fetch_max keeps a late transition from
        // resurrecting the session.
        self.state.fetch_max(state, Ordering::SeqCst);
    }

    fn enqueue(&self, bytes: Bytes) {
        // A send after the writer exited just vanishes with the session.
        let _ = self.queue.send(WriteCommand::Data(bytes));
    }

    // --- outbound --------------------------------------------------------

    pub(crate) fn send_data(&self, opcode: Opcode, payload: &[u8]) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        let mut data = Bytes::copy_from_slice(payload);
        let mut rsv = 0u8;
        {
            let mut extensions = lock(&self.extensions);
            for extension in extensions.iter_mut() {
                let (next, bits) = extension.encode(data)?;
                data = next;
                rsv |= bits;
            }
        }
        self.enqueue(self.encoder.message(opcode, &data, rsv));
        Ok(())
    }

    pub(crate) fn send_fragment(&self, opcode: Opcode, payload: &[u8], fin: bool) {
        if self.state.load(Ordering::SeqCst) == STATE_CLOSED {
            return;
        }
        self.enqueue(self.encoder.fragment(opcode, payload, fin));
    }

    pub(crate) fn take_partial_slot(&self) -> Result<()> {
        if !self.is_open() {
            return Err(Error::NotOpen);
        }
        if self.partial_open.swap(true, Ordering::SeqCst) {
            return Err(Error::WriterBusy);
        }
        Ok(())
    }

    pub(crate) fn release_partial_slot(&self) {
        self.partial_open.store(false, Ordering::SeqCst);
    }

    pub(crate) fn check_connection(self: &Arc<Self>, timeout: Duration) {
        if !self.is_open() {
            return;
        }
        let weak = Arc::downgrade(self);
        let task = self.reactor.schedule(timeout, move || {
            if let Some(session) = weak.upgrade() {
                log::debug(TAG, "ping deadline expired");
                session.close_now();
            }
        });
        {
            let mut guard = lock(&self.ping_deadline);
            if let Some(previous) = guard.take() {
                previous.cancel();
            }
            *guard = task;
        }
        self.enqueue(self.encoder.control(Opcode::Ping, &[]));
    }

    // --- closing ---------------------------------------------------------

    pub(crate) fn close_with(self: &Arc<Self>, code: u16, reason: &str) {
        if !self.is_open() {
            return;
        }
        if self.close_sent.swap(true, Ordering::SeqCst) {
            return;
        }
        self.advance_state(STATE_CLOSING);
        self.enqueue(self.encoder.close(code, reason));

        let weak = Arc::downgrade(self);
        let reason = reason.to_string();
        let task = self.reactor.schedule(self.close_grace_period, move || {
            if let Some(session) = weak.upgrade() {
                log::debug(TAG, "close grace period expired; dropping socket");
                session.teardown(code, &reason);
            }
        });
        *lock(&self.close_grace) = task;
    }

    /// Drop the socket without a closing handshake.
    pub(crate) fn close_now(&self) {
        if self.state.load(Ordering::SeqCst) == STATE_CLOSED {
            return;
        }
        self.teardown(close_code::NORMAL_CLOSURE, "normal closure");
    }

    fn cancel_timers(&self) {
        if let Some(task) = lock(&self.ping_deadline).take() {
            task.cancel();
        }
        if let Some(task) = lock(&self.close_grace).take() {
            task.cancel();
        }
    }

    /// Final teardown: stop both driver tasks, drop the socket, and deliver
    /// the close callback. Safe to call from any thread, any number of
    /// times; the callback fires at most once.
    fn teardown(&self, code: u16, reason: &str) {
        self.advance_state(STATE_CLOSED);
        self.cancel_timers();
        let _ = self.queue.send(WriteCommand::Shutdown);
        if let Some(handle) = lock(&self.reader_abort).take() {
            handle.abort();
        }
        self.fire_closed(code, reason);
    }

    fn fire_closed(&self, code: u16, reason: &str) {
        if !self.closed_fired.swap(true, Ordering::SeqCst) {
            self.handler.on_close(code, reason);
        }
    }

    // --- inbound ---------------------------------------------------------

    /// Dispatch every frame currently buffered in `decoder`. Returns false
    /// once the session is finished and the read loop should exit.
    pub(crate) fn process_inbound(
        &self,
        decoder: &mut FrameDecoder,
        assembler: &mut MessageAssembler,
    ) -> bool {
        loop {
            let frame = match decoder.next() {
                Ok(Some(frame)) => frame,
                Ok(None) => return self.state.load(Ordering::SeqCst) != STATE_CLOSED,
                Err(err) => {
                    self.on_protocol_error(&err);
                    return false;
                }
            };

            if frame.is_control() {
                match frame.opcode {
                    Opcode::Ping => {
                        self.enqueue(self.encoder.control(Opcode::Pong, &frame.payload));
                        self.handler.on_ping(&frame.payload);
                    }
                    Opcode::Pong => {
                        if let Some(task) = lock(&self.ping_deadline).take() {
                            task.cancel();
                        }
                        self.handler.on_pong(&frame.payload);
                    }
                    Opcode::Close => {
                        self.on_close_frame(&frame.payload);
                        return false;
                    }
                    _ => {}
                }
                continue;
            }

            match assembler.push(frame) {
                Ok(Some(message)) => {
                    if let Err(err) = self.deliver(message) {
                        self.on_protocol_error(&err);
                        return false;
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    self.on_protocol_error(&err);
                    return false;
                }
            }
        }
    }

    fn deliver(&self, message: AssembledMessage) -> Result<()> {
        let mut payload = message.payload.freeze();
        {
            let mut extensions = lock(&self.extensions);
            for extension in extensions.iter_mut().rev() {
                payload = extension.decode(payload, message.rsv)?;
            }
        }
        match message.opcode {
            Opcode::Text => {
                let text = String::from_utf8(payload.to_vec())
                    .map_err(|_| ProtocolViolation::InvalidUtf8)?;
                self.handler.on_text(text);
            }
            Opcode::Binary => self.handler.on_binary(payload),
            _ => {}
        }
        Ok(())
    }

    fn on_close_frame(&self, payload: &[u8]) {
        let (code, reason) = match parse_close_payload(payload) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.on_protocol_error(&err);
                return;
            }
        };
        let code = code.unwrap_or(close_code::NORMAL_CLOSURE);
        if !self.close_sent.swap(true, Ordering::SeqCst) {
            // Server-initiated close: echo before dropping the socket.
            self.enqueue(self.encoder.close(code, ""));
        }
        self.teardown(code, &reason);
    }

    fn on_protocol_error(&self, err: &Error) {
        log::stacktrace(TAG, err);
        let code = err.close_code();
        let reason = err.to_string();
        if !self.close_sent.swap(true, Ordering::SeqCst) {
            self.enqueue(self.encoder.close(code, &reason));
        }
        self.teardown(code, &reason);
    }

    pub(crate) fn on_eof(&self) {
        log::debug(TAG, "connection closed by peer");
        self.teardown(close_code::ABNORMAL_CLOSURE, "abnormal closure");
    }

    pub(crate) fn on_transport_error(&self) {
        self.teardown(close_code::ABNORMAL_CLOSURE, "abnormal closure");
    }
}

fn parse_close_payload(payload: &[u8]) -> Result<(Option<u16>, String)> {
    match payload.len() {
        0 => Ok((None, String::new())),
        1 => Err(ProtocolViolation::InvalidClosePayload.into()),
        _ => {
            let code = u16::from_be_bytes([payload[0], payload[1]]);
            let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
            Ok((Some(code), reason))
        }
    }
}

/// Handle to one WebSocket session.
///
/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct WebSocket {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocket")
            .field("uri", &self.inner.uri.as_str())
            .field("open", &self.inner.is_open())
            .field("protocol", &self.inner.protocol)
            .finish()
    }
}

impl WebSocket {
    pub(crate) fn new(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    /// Whether the session is open for sending
    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    /// The URI this session was opened against
    pub fn uri(&self) -> &str {
        self.inner.uri.as_str()
    }

    /// Subprotocol the server selected, if any
    pub fn protocol(&self) -> Option<&str> {
        self.inner.protocol.as_deref()
    }

    /// Extensions active on this session, in negotiation order
    pub fn extensions(&self) -> &[ExtensionInfo] {
        &self.inner.extension_info
    }

    /// Queue a text message. Quietly does nothing when the session is not
    /// open.
    pub fn send_text(&self, message: &str) -> Result<()> {
        self.inner.send_data(Opcode::Text, message.as_bytes())
    }

    /// Queue a binary message. Quietly does nothing when the session is not
    /// open.
    pub fn send_binary(&self, message: &[u8]) -> Result<()> {
        self.inner.send_data(Opcode::Binary, message)
    }

    /// Start a partially written message. At most one partial writer may be
    /// open per session; regular sends must not run until it finishes, or
    /// their frames would interleave with the fragments on the wire.
    pub fn partial_writer(&self, kind: MessageKind) -> Result<PartialMessageWriter> {
        self.inner.take_partial_slot()?;
        Ok(PartialMessageWriter {
            inner: self.inner.clone(),
            opcode: kind.opcode(),
            started: false,
            finished: false,
        })
    }

    /// Send a PING and arm a deadline: unless a PONG arrives within
    /// `timeout`, the session is force-closed. Re-arming cancels the
    /// previous deadline.
    pub fn check_connection(&self, timeout: Duration) {
        self.inner.check_connection(timeout);
    }

    /// Close gracefully with NORMAL_CLOSURE. Idempotent.
    pub fn close(&self) {
        self.inner
            .close_with(close_code::NORMAL_CLOSURE, "normal closure");
    }

    /// Close gracefully with an explicit code and reason. Idempotent.
    pub fn close_with(&self, code: u16, reason: &str) {
        self.inner.close_with(code, reason);
    }

    /// Drop the socket immediately, skipping the closing handshake.
    pub fn close_now(&self) {
        self.inner.close_now();
    }
}

/// Writer emitting one message as explicitly sized fragments.
///
/// The first fragment carries the message opcode, the rest are
/// CONTINUATIONs; `fin` on a fragment (or [`finish`](Self::finish), or
/// dropping the writer) ends the message. Extensions are not applied to
/// partially written messages.
pub struct PartialMessageWriter {
    inner: Arc<SessionInner>,
    opcode: Opcode,
    started: bool,
    finished: bool,
}

impl std::fmt::Debug for PartialMessageWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartialMessageWriter")
            .field("opcode", &self.opcode)
            .field("started", &self.started)
            .field("finished", &self.finished)
            .finish()
    }
}

impl PartialMessageWriter {
    /// Queue one fragment. `fin` marks the final fragment of the message.
    pub fn send_fragment(&mut self, payload: &[u8], fin: bool) -> Result<()> {
        if self.finished {
            return Err(Error::WriterFinished);
        }
        let opcode = if self.started {
            Opcode::Continuation
        } else {
            self.opcode
        };
        self.inner.send_fragment(opcode, payload, fin);
        self.started = true;
        if fin {
            self.finished = true;
            self.inner.release_partial_slot();
        }
        Ok(())
    }

    /// End the message, emitting an empty final fragment if none was sent.
    pub fn finish(mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.send_fragment(&[], true)
    }
}

impl Drop for PartialMessageWriter {
    fn drop(&mut self) {
        if !self.finished {
            let opcode = if self.started {
                Opcode::Continuation
            } else {
                self.opcode
            };
            self.inner.send_fragment(opcode, &[], true);
            self.finished = true;
            self.inner.release_partial_slot();
        }
    }
}
