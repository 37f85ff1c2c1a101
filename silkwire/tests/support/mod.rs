//! In-process WebSocket server for integration tests.
#![allow(dead_code)]
//!
//! Speaks just enough of the server side of RFC 6455 to exercise the
//! client: upgrade handshake, masked-frame parsing, message assembly,
//! echoing, optional per-message deflate, and a handful of misbehavior
//! switches for the failure-path tests.

use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use sha1::{Digest, Sha1};
use silkwire::EventHandler;
use silkwire_core::deflate::{CompressionStrategy, DeflateParams, PerMessageDeflate};
use silkwire_core::extension::Extension;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub const OPCODE_CONTINUATION: u8 = 0x0;
pub const OPCODE_TEXT: u8 = 0x1;
pub const OPCODE_BINARY: u8 = 0x2;
pub const OPCODE_CLOSE: u8 = 0x8;
pub const OPCODE_PING: u8 = 0x9;
pub const OPCODE_PONG: u8 = 0xA;

const RSV1: u8 = 0b100;

/// What the server should do with each connection.
#[derive(Clone)]
pub struct ServerOptions {
    /// Subprotocol to select when the client offers it
    pub subprotocol: Option<String>,
    /// Negotiate permessage-deflate at this window size (both directions)
    pub deflate_window_bits: Option<u8>,
    /// Reply to PINGs with PONGs
    pub answer_pings: bool,
    /// Reply to the client's CLOSE frame
    pub answer_close: bool,
    /// Fragment echoed messages at this size
    pub echo_fragment_size: Option<usize>,
    /// Raw bytes written immediately after the 101 response
    pub inject_after_handshake: Option<Vec<u8>>,
    /// Send a CLOSE with this code right after the handshake
    pub close_after_handshake: Option<u16>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            subprotocol: None,
            deflate_window_bits: None,
            answer_pings: true,
            answer_close: true,
            echo_fragment_size: None,
            inject_after_handshake: None,
            close_after_handshake: None,
        }
    }
}

/// Observations the server reports back to the test.
#[derive(Debug)]
pub enum ServerEvent {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Close(Option<u16>),
}

pub struct TestServer {
    addr: SocketAddr,
    pub events: mpsc::UnboundedReceiver<ServerEvent>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn start(options: ServerOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (events_tx, events) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            loop {
                let (socket, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => return,
                };
                let options = options.clone();
                let events_tx = events_tx.clone();
                tokio::spawn(serve_connection(socket, options, events_tx));
            }
        });
        Self {
            addr,
            events,
            handle,
        }
    }

    pub fn uri(&self) -> String {
        format!("ws://127.0.0.1:{}/", self.addr.port())
    }

    pub async fn next_event(&mut self, wait: Duration) -> Option<ServerEvent> {
        tokio::time::timeout(wait, self.events.recv()).await.ok()?
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_connection(
    mut socket: TcpStream,
    options: ServerOptions,
    events: mpsc::UnboundedSender<ServerEvent>,
) {
    let mut buf = Vec::new();
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let mut tmp = [0u8; 4096];
        let n = match socket.read(&mut tmp).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buf.extend_from_slice(&tmp[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    buf.drain(..head_end + 4);

    let key = match header_value(&head, "sec-websocket-key") {
        Some(key) => key,
        None => return,
    };
    let mut response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n",
        accept_for(&key)
    );

    if let Some(subprotocol) = &options.subprotocol {
        let offered = header_value(&head, "sec-websocket-protocol").unwrap_or_default();
        if offered.split(',').any(|p| p.trim() == subprotocol) {
            response.push_str(&format!("Sec-WebSocket-Protocol: {subprotocol}\r\n"));
        }
    }

    let mut deflate = None;
    if let Some(bits) = options.deflate_window_bits {
        let offered = header_value(&head, "sec-websocket-extensions").unwrap_or_default();
        if offered.contains("permessage-deflate") {
            response.push_str(&format!(
                "Sec-WebSocket-Extensions: permessage-deflate; \
                 client_max_window_bits={bits}; server_max_window_bits={bits}\r\n"
            ));
            // Symmetric windows let one codec serve both directions.
            deflate = Some(PerMessageDeflate::new(
                DeflateParams {
                    client_max_window_bits: bits,
                    server_max_window_bits: bits,
                    ..DeflateParams::default()
                },
                CompressionStrategy::default(),
            ));
        }
    }
    response.push_str("\r\n");
    if socket.write_all(response.as_bytes()).await.is_err() {
        return;
    }

    if let Some(raw) = &options.inject_after_handshake {
        let _ = socket.write_all(raw).await;
    }
    if let Some(code) = options.close_after_handshake {
        write_frame(&mut socket, true, 0, OPCODE_CLOSE, &code.to_be_bytes()).await;
    }

    let close_sent = options.close_after_handshake.is_some();
    let mut message: Option<(u8, u8, Vec<u8>)> = None;
    loop {
        let (fin, rsv, opcode, payload) = match read_frame(&mut socket, &mut buf).await {
            Some(frame) => frame,
            None => return,
        };

        match opcode {
            OPCODE_PING => {
                let _ = events.send(ServerEvent::Ping(payload.clone()));
                if options.answer_pings {
                    write_frame(&mut socket, true, 0, OPCODE_PONG, &payload).await;
                }
            }
            OPCODE_PONG => {}
            OPCODE_CLOSE => {
                let code = (payload.len() >= 2)
                    .then(|| u16::from_be_bytes([payload[0], payload[1]]));
                let _ = events.send(ServerEvent::Close(code));
                if !options.answer_close {
                    // Leave the socket open and silent; the client's close
                    // grace timer is on its own.
                    continue;
                }
                if !close_sent {
                    write_frame(&mut socket, true, 0, OPCODE_CLOSE, &payload).await;
                }
                let _ = socket.shutdown().await;
                return;
            }
            OPCODE_TEXT | OPCODE_BINARY | OPCODE_CONTINUATION => {
                match &mut message {
                    Some((_, _, body)) => body.extend_from_slice(&payload),
                    None => message = Some((opcode, rsv, payload)),
                }
                if !fin {
                    continue;
                }
                let (opcode, rsv, mut body) = match message.take() {
                    Some(complete) => complete,
                    None => continue,
                };

                let mut echo_rsv = 0;
                if let Some(codec) = &mut deflate {
                    if rsv & RSV1 != 0 {
                        body = codec.decode(Bytes::from(body), RSV1).unwrap().to_vec();
                    }
                    let (compressed, bits) = codec.encode(Bytes::from(body.clone())).unwrap();
                    let _ = events.send(match opcode {
                        OPCODE_TEXT => {
                            ServerEvent::Text(String::from_utf8_lossy(&body).into_owned())
                        }
                        _ => ServerEvent::Binary(body),
                    });
                    body = compressed.to_vec();
                    echo_rsv = bits;
                } else {
                    let _ = events.send(match opcode {
                        OPCODE_TEXT => {
                            ServerEvent::Text(String::from_utf8_lossy(&body).into_owned())
                        }
                        _ => ServerEvent::Binary(body.clone()),
                    });
                }

                echo_message(&mut socket, opcode, echo_rsv, &body, &options).await;
            }
            _ => return,
        }
    }
}

async fn echo_message(
    socket: &mut TcpStream,
    opcode: u8,
    rsv: u8,
    body: &[u8],
    options: &ServerOptions,
) {
    match options.echo_fragment_size {
        Some(chunk) if chunk > 0 && body.len() > chunk => {
            let mut offset = 0;
            let mut first = true;
            while offset < body.len() {
                let end = usize::min(offset + chunk, body.len());
                let fin = end == body.len();
                let op = if first { opcode } else { OPCODE_CONTINUATION };
                let bits = if first { rsv } else { 0 };
                write_frame(socket, fin, bits, op, &body[offset..end]).await;
                offset = end;
                first = false;
            }
        }
        _ => write_frame(socket, true, rsv, opcode, body).await,
    }
}

fn header_value(head: &str, name: &str) -> Option<String> {
    head.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim().to_string())
    })
}

fn accept_for(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11");
    general_purpose::STANDARD.encode(hasher.finalize())
}

/// Read one client frame, unmasking the payload.
async fn read_frame(
    socket: &mut TcpStream,
    buf: &mut Vec<u8>,
) -> Option<(bool, u8, u8, Vec<u8>)> {
    loop {
        if let Some((frame, consumed)) = try_parse_frame(buf) {
            buf.drain(..consumed);
            return Some(frame);
        }
        let mut tmp = [0u8; 16 * 1024];
        let n = socket.read(&mut tmp).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&tmp[..n]);
    }
}

#[allow(clippy::type_complexity)]
fn try_parse_frame(buf: &[u8]) -> Option<((bool, u8, u8, Vec<u8>), usize)> {
    if buf.len() < 2 {
        return None;
    }
    let b0 = buf[0];
    let b1 = buf[1];
    let masked = b1 & 0x80 != 0;
    let len7 = (b1 & 0x7F) as usize;
    let (header_len, payload_len) = match len7 {
        126 => {
            if buf.len() < 4 {
                return None;
            }
            (4, u16::from_be_bytes([buf[2], buf[3]]) as usize)
        }
        127 => {
            if buf.len() < 10 {
                return None;
            }
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&buf[2..10]);
            (10, u64::from_be_bytes(bytes) as usize)
        }
        n => (2, n),
    };
    let mask_len = if masked { 4 } else { 0 };
    let total = header_len + mask_len + payload_len;
    if buf.len() < total {
        return None;
    }
    let mut payload = buf[header_len + mask_len..total].to_vec();
    if masked {
        let mut key = [0u8; 4];
        key.copy_from_slice(&buf[header_len..header_len + 4]);
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= key[i % 4];
        }
    }
    Some(((b0 & 0x80 != 0, (b0 >> 4) & 0b111, b0 & 0x0F, payload), total))
}

/// Write one unmasked server frame.
async fn write_frame(socket: &mut TcpStream, fin: bool, rsv: u8, opcode: u8, payload: &[u8]) {
    let mut out = Vec::with_capacity(payload.len() + 10);
    out.push(((fin as u8) << 7) | (rsv << 4) | opcode);
    let len = payload.len();
    if len < 126 {
        out.push(len as u8);
    } else if len <= u16::MAX as usize {
        out.push(126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }
    out.extend_from_slice(payload);
    let _ = socket.write_all(&out).await;
}

/// Client-side event recording.
#[derive(Debug, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close { code: u16, reason: String },
}

pub struct RecordingHandler {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl EventHandler for RecordingHandler {
    fn on_connected(&self) {
        let _ = self.tx.send(ClientEvent::Connected);
    }

    fn on_text(&self, message: String) {
        let _ = self.tx.send(ClientEvent::Text(message));
    }

    fn on_binary(&self, message: Bytes) {
        let _ = self.tx.send(ClientEvent::Binary(message.to_vec()));
    }

    fn on_ping(&self, payload: &[u8]) {
        let _ = self.tx.send(ClientEvent::Ping(payload.to_vec()));
    }

    fn on_pong(&self, payload: &[u8]) {
        let _ = self.tx.send(ClientEvent::Pong(payload.to_vec()));
    }

    fn on_close(&self, code: u16, reason: &str) {
        let _ = self.tx.send(ClientEvent::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

pub struct ClientEvents {
    rx: mpsc::UnboundedReceiver<ClientEvent>,
}

impl ClientEvents {
    pub async fn next(&mut self, wait: Duration) -> Option<ClientEvent> {
        tokio::time::timeout(wait, self.rx.recv()).await.ok()?
    }

    /// Drain events until a close arrives, returning its code and reason.
    pub async fn wait_for_close(&mut self, wait: Duration) -> Option<(u16, String)> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .unwrap_or_default();
            match self.next(remaining).await? {
                ClientEvent::Close { code, reason } => return Some((code, reason)),
                _ => continue,
            }
        }
    }
}

pub fn recording_handler() -> (Arc<RecordingHandler>, ClientEvents) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(RecordingHandler { tx }), ClientEvents { rx })
}
