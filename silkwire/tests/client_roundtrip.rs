//! End-to-end session tests against the in-process server: handshake
//! negotiation, echoes, compression, and fragmentation.

mod support;

use silkwire::{
    CompressionStrategy, DeflateRequest, Error, HandshakeHandler, HandshakeResponse,
    MessageKind, SessionConfig, WebSocketFactory,
};
use silkwire_core::error::HandshakeError;
use std::sync::Arc;
use std::time::Duration;
use support::{recording_handler, ClientEvent, ServerEvent, ServerOptions, TestServer};

const WAIT: Duration = Duration::from_secs(5);

const SUBPROTOCOL: &str = "v1.test.protocol";
const UNKNOWN_SUBPROTOCOL: &str = "dummy.protocol";

#[tokio::test]
async fn text_echo() {
    let mut server = TestServer::start(ServerOptions::default()).await;
    let (handler, mut events) = recording_handler();
    let factory = WebSocketFactory::new().unwrap();

    let ws = factory.open(&server.uri(), handler).await.unwrap();
    assert!(ws.is_open());
    assert_eq!(events.next(WAIT).await, Some(ClientEvent::Connected));

    ws.send_text("hello, silkwire").unwrap();
    assert_eq!(
        events.next(WAIT).await,
        Some(ClientEvent::Text("hello, silkwire".to_string()))
    );
    match server.next_event(WAIT).await {
        Some(ServerEvent::Text(text)) => assert_eq!(text, "hello, silkwire"),
        other => panic!("unexpected server event: {other:?}"),
    }

    factory.destroy();
}

#[tokio::test]
async fn subprotocol_accepted() {
    let server = TestServer::start(ServerOptions {
        subprotocol: Some(SUBPROTOCOL.to_string()),
        ..ServerOptions::default()
    })
    .await;
    let (handler, _events) = recording_handler();
    let factory = WebSocketFactory::new().unwrap();

    let config = SessionConfig::default().add_protocol(SUBPROTOCOL);
    let ws = factory.open_with(&server.uri(), handler, config).await.unwrap();
    assert!(ws.is_open());
    assert_eq!(ws.protocol(), Some(SUBPROTOCOL));

    factory.destroy();
}

#[tokio::test]
async fn subprotocol_rejected() {
    let server = TestServer::start(ServerOptions {
        subprotocol: Some(SUBPROTOCOL.to_string()),
        ..ServerOptions::default()
    })
    .await;
    let (handler, _events) = recording_handler();
    let factory = WebSocketFactory::new().unwrap();

    let config = SessionConfig::default().add_protocol(UNKNOWN_SUBPROTOCOL);
    let result = factory.open_with(&server.uri(), handler, config).await;
    assert!(matches!(
        result,
        Err(Error::Handshake(HandshakeError::MissingSubprotocol))
    ));

    factory.destroy();
}

struct AcceptAll;

impl HandshakeHandler for AcceptAll {
    fn on_response(&self, _: &HandshakeResponse) -> bool {
        true
    }
}

struct RejectAll;

impl HandshakeHandler for RejectAll {
    fn on_response(&self, _: &HandshakeResponse) -> bool {
        false
    }
}

#[tokio::test]
async fn handshake_hook_accepts_missing_subprotocol() {
    let server = TestServer::start(ServerOptions {
        subprotocol: Some(SUBPROTOCOL.to_string()),
        ..ServerOptions::default()
    })
    .await;
    let (handler, _events) = recording_handler();
    let factory = WebSocketFactory::new().unwrap();

    let config = SessionConfig::default()
        .add_protocol(UNKNOWN_SUBPROTOCOL)
        .handshake_handler(Arc::new(AcceptAll));
    let ws = factory.open_with(&server.uri(), handler, config).await.unwrap();
    assert!(ws.is_open());
    assert_eq!(ws.protocol(), None);

    factory.destroy();
}

#[tokio::test]
async fn handshake_hook_rejects_valid_response() {
    let server = TestServer::start(ServerOptions {
        subprotocol: Some(SUBPROTOCOL.to_string()),
        ..ServerOptions::default()
    })
    .await;
    let (handler, _events) = recording_handler();
    let factory = WebSocketFactory::new().unwrap();

    let config = SessionConfig::default()
        .add_protocol(SUBPROTOCOL)
        .handshake_handler(Arc::new(RejectAll));
    let result = factory.open_with(&server.uri(), handler, config).await;
    assert!(matches!(
        result,
        Err(Error::Handshake(HandshakeError::RejectedByHandler))
    ));

    factory.destroy();
}

async fn deflate_text_echo_at_window(bits: u8) {
    const MESSAGE_SIZE: usize = 4096;

    let mut server = TestServer::start(ServerOptions {
        deflate_window_bits: Some(bits),
        ..ServerOptions::default()
    })
    .await;
    let (handler, mut events) = recording_handler();
    let factory = WebSocketFactory::new().unwrap();

    // The cap sits at the message size exactly: compressed frames are far
    // below it on the wire, and the inflated echo lands right on the limit.
    let config = SessionConfig::default()
        .add_extension(
            DeflateRequest::builder()
                .max_client_window_bits(bits)
                .max_server_window_bits(bits)
                .build()
                .unwrap(),
        )
        .max_payload_size(MESSAGE_SIZE);
    let ws = factory.open_with(&server.uri(), handler, config).await.unwrap();

    assert_eq!(ws.extensions().len(), 1);
    assert_eq!(ws.extensions()[0].name, "permessage-deflate");

    let data: String = "0123456789abcdef".repeat(MESSAGE_SIZE / 16);
    assert_eq!(data.len(), MESSAGE_SIZE);
    ws.send_text(&data).unwrap();

    match server.next_event(WAIT).await {
        Some(ServerEvent::Text(received)) => assert_eq!(received, data),
        other => panic!("unexpected server event: {other:?}"),
    }
    match events.next(WAIT).await {
        Some(ClientEvent::Connected) => {}
        other => panic!("expected connected event, got {other:?}"),
    }
    match events.next(WAIT).await {
        Some(ClientEvent::Text(received)) => assert_eq!(received, data),
        other => panic!("expected echoed text, got {other:?}"),
    }

    factory.destroy();
}

#[tokio::test]
async fn deflate_text_echo_window_8() {
    deflate_text_echo_at_window(8).await;
}

#[tokio::test]
async fn deflate_text_echo_window_15() {
    deflate_text_echo_at_window(15).await;
}

#[tokio::test]
async fn deflate_below_threshold_passes_plain() {
    let mut server = TestServer::start(ServerOptions {
        deflate_window_bits: Some(15),
        ..ServerOptions::default()
    })
    .await;
    let (handler, mut events) = recording_handler();
    let factory = WebSocketFactory::new().unwrap();

    let config = SessionConfig::default().add_extension(
        DeflateRequest::builder()
            .strategy(CompressionStrategy {
                min_size_in_bytes: 1024,
            })
            .build()
            .unwrap(),
    );
    let ws = factory.open_with(&server.uri(), handler, config).await.unwrap();

    ws.send_text("short message").unwrap();
    match server.next_event(WAIT).await {
        Some(ServerEvent::Text(received)) => assert_eq!(received, "short message"),
        other => panic!("unexpected server event: {other:?}"),
    }
    events.next(WAIT).await; // connected
    assert_eq!(
        events.next(WAIT).await,
        Some(ClientEvent::Text("short message".to_string()))
    );

    factory.destroy();
}

#[tokio::test]
async fn fragmented_binary_echo() {
    const MESSAGE_SIZE: usize = 4 * 1024 * 1024;

    let mut server = TestServer::start(ServerOptions {
        echo_fragment_size: Some(300_000),
        ..ServerOptions::default()
    })
    .await;
    let (handler, mut events) = recording_handler();
    let factory = WebSocketFactory::new().unwrap();

    let config = SessionConfig::default().fragment_size(512 * 1024);
    let ws = factory.open_with(&server.uri(), handler, config).await.unwrap();

    let mut data = vec![0u8; MESSAGE_SIZE];
    silkwire_core::random::fill(&mut data);
    ws.send_binary(&data).unwrap();

    // Client-to-server direction: the server reassembled our fragments in
    // order.
    match server.next_event(WAIT).await {
        Some(ServerEvent::Binary(received)) => assert_eq!(received, data),
        other => panic!("unexpected server event: {other:?}"),
    }

    // Server-to-client direction: the echo comes back in different-sized
    // fragments and must still reassemble byte-for-byte.
    events.next(WAIT).await; // connected
    match events.next(WAIT).await {
        Some(ClientEvent::Binary(received)) => assert_eq!(received, data),
        other => panic!("expected echoed binary, got {other:?}"),
    }

    factory.destroy();
}

#[tokio::test]
async fn partial_writer_round_trip() {
    let mut server = TestServer::start(ServerOptions::default()).await;
    let (handler, _events) = recording_handler();
    let factory = WebSocketFactory::new().unwrap();

    let ws = factory.open(&server.uri(), handler).await.unwrap();

    let mut writer = ws.partial_writer(MessageKind::Text).unwrap();
    writer.send_fragment(b"Hello, ", false).unwrap();
    writer.send_fragment(b"world!", true).unwrap();

    match server.next_event(WAIT).await {
        Some(ServerEvent::Text(received)) => assert_eq!(received, "Hello, world!"),
        other => panic!("unexpected server event: {other:?}"),
    }

    // The slot freed up; a second writer may open now.
    let writer = ws.partial_writer(MessageKind::Binary).unwrap();
    writer.finish().unwrap();

    factory.destroy();
}

#[tokio::test]
async fn partial_writer_is_exclusive() {
    let server = TestServer::start(ServerOptions::default()).await;
    let (handler, _events) = recording_handler();
    let factory = WebSocketFactory::new().unwrap();

    let ws = factory.open(&server.uri(), handler).await.unwrap();

    let _writer = ws.partial_writer(MessageKind::Text).unwrap();
    assert!(matches!(
        ws.partial_writer(MessageKind::Text),
        Err(Error::WriterBusy)
    ));

    factory.destroy();
}

#[tokio::test]
async fn dropped_partial_writer_finishes_message() {
    let mut server = TestServer::start(ServerOptions::default()).await;
    let (handler, _events) = recording_handler();
    let factory = WebSocketFactory::new().unwrap();

    let ws = factory.open(&server.uri(), handler).await.unwrap();

    {
        let mut writer = ws.partial_writer(MessageKind::Text).unwrap();
        writer.send_fragment(b"unfinished", false).unwrap();
        // Dropped without an explicit final fragment.
    }

    match server.next_event(WAIT).await {
        Some(ServerEvent::Text(received)) => assert_eq!(received, "unfinished"),
        other => panic!("unexpected server event: {other:?}"),
    }

    factory.destroy();
}
