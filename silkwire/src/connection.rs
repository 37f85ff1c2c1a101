//! Connection driver loops
//!
//! Each session runs two tasks on the reactor: the write loop drains the
//! session's command queue in FIFO order (which is what linearizes
//! concurrent sends and keeps the fragments of one message contiguous on
//! the wire), and the read loop feeds inbound bytes through the frame
//! decoder and dispatches in wire order.

use crate::session::SessionInner;
use crate::transport::TransportStream;
use bytes::{Bytes, BytesMut};
use silkwire_core::log;
use silkwire_core::message::MessageAssembler;
use silkwire_core::FrameDecoder;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc::UnboundedReceiver;

const TAG: &str = "connection";

const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Commands consumed by the write loop.
pub(crate) enum WriteCommand {
    /// Write these bytes, then flush. A multi-fragment message arrives as
    /// one command so its frames cannot interleave with other sends.
    Data(Bytes),
    /// Shut the write half down and exit. Ordered behind any CLOSE frame
    /// already queued.
    Shutdown,
}

pub(crate) async fn write_loop(
    mut stream: WriteHalf<Box<dyn TransportStream>>,
    mut queue: UnboundedReceiver<WriteCommand>,
    session: Arc<SessionInner>,
) {
    while let Some(command) = queue.recv().await {
        match command {
            WriteCommand::Data(bytes) => {
                let result = async {
                    stream.write_all(&bytes).await?;
                    stream.flush().await
                }
                .await;
                if let Err(err) = result {
                    log::stacktrace(TAG, &err);
                    session.on_transport_error();
                    return;
                }
            }
            WriteCommand::Shutdown => {
                let _ = stream.shutdown().await;
                return;
            }
        }
    }
}

pub(crate) async fn read_loop(
    mut stream: ReadHalf<Box<dyn TransportStream>>,
    session: Arc<SessionInner>,
    mut decoder: FrameDecoder,
    mut assembler: MessageAssembler,
    handshake_surplus: BytesMut,
) {
    decoder.feed(&handshake_surplus);

    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    loop {
        // Drain everything buffered before blocking on the socket again;
        // the handshake surplus is handled by the first pass.
        if !session.process_inbound(&mut decoder, &mut assembler) {
            return;
        }
        match stream.read(&mut chunk).await {
            Ok(0) => {
                session.on_eof();
                return;
            }
            Ok(n) => decoder.feed(&chunk[..n]),
            Err(err) => {
                log::stacktrace(TAG, &err);
                session.on_transport_error();
                return;
            }
        }
    }
}
