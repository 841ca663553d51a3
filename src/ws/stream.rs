//! WebSocket connection wrapper
//!
//! Runs a background read loop for the lifetime of an upgraded connection,
//! accumulating payloads until FIN and dispatching complete messages to a
//! [`WsEvents`] receiver. Outbound frames serialize through one write lock
//! so the fan-out loop and the internal pong reply can never interleave
//! partial frames.

use std::io;
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::WsError;
use crate::ws::frame::{self, generate_mask, Opcode};

/// Receiver interface for inbound WebSocket traffic
///
/// All methods default to no-ops. Continuation at message start is reported
/// via `on_unexpected`: multi-frame reassembly across an initial
/// continuation opcode is not supported.
pub trait WsEvents: Send + Sync {
    fn on_text(&self, _text: &str) {}
    fn on_binary(&self, _data: Bytes) {}
    fn on_close(&self, _data: Bytes) {}
    fn on_unexpected(&self, _opcode: u8, _data: Bytes) {}
    fn on_reserved(&self, _opcode: u8, _data: Bytes) {}
    /// Read loop exited (close frame, error or cancellation)
    fn on_stop(&self) {}
}

type SharedWriter = Arc<tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Bidirectional WebSocket channel over an upgraded connection
pub struct WsStream {
    writer: SharedWriter,
    token: CancellationToken,
    read_task: Mutex<Option<JoinHandle<()>>>,
}

impl WsStream {
    /// Take ownership of the raw streams and spawn the read loop
    pub fn start<R, W>(reader: R, writer: W, events: Arc<dyn WsEvents>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(Box::new(writer)));
        let token = CancellationToken::new();
        let task = tokio::spawn(read_loop(
            reader,
            Arc::clone(&writer),
            events,
            token.clone(),
        ));
        Self {
            writer,
            token,
            read_task: Mutex::new(Some(task)),
        }
    }

    /// Write one frame; a masked write generates a fresh non-zero key
    pub async fn write_frame(
        &self,
        opcode: Opcode,
        masked: bool,
        payload: &[u8],
    ) -> io::Result<()> {
        let mask = if masked { Some(generate_mask()) } else { None };
        let mut writer = self.writer.lock().await;
        frame::write_frame(&mut *writer, opcode, mask, payload).await
    }

    pub async fn write_text(&self, masked: bool, text: &str) -> io::Result<()> {
        self.write_frame(Opcode::Text, masked, text.as_bytes()).await
    }

    pub async fn write_binary(&self, masked: bool, data: &[u8]) -> io::Result<()> {
        self.write_frame(Opcode::Binary, masked, data).await
    }

    /// Stop and join the read loop; optionally shut the write side down
    ///
    /// The read-loop task has exited by the time this returns.
    pub async fn close(&self, close_streams: bool) {
        self.token.cancel();
        let task = self.read_task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        if close_streams {
            let mut writer = self.writer.lock().await;
            let _ = writer.shutdown().await;
        }
    }
}

impl Drop for WsStream {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(task) = self.read_task.lock().unwrap().take() {
            task.abort();
        }
    }
}

async fn read_loop<R>(
    mut reader: R,
    writer: SharedWriter,
    events: Arc<dyn WsEvents>,
    token: CancellationToken,
) where
    R: AsyncRead + Send + Unpin,
{
    let result: Result<(), WsError> = async {
        loop {
            let mut message = BytesMut::new();
            let mut message_opcode: Option<Opcode> = None;

            // Accumulate frames until FIN; the message keeps the opcode of
            // its first frame.
            loop {
                let frame = tokio::select! {
                    _ = token.cancelled() => return Ok(()),
                    frame = frame::read_frame(&mut reader) => frame?,
                };
                message_opcode.get_or_insert(frame.opcode);
                message.extend_from_slice(&frame.payload);
                if frame.fin {
                    let opcode = message_opcode.take().unwrap_or(Opcode::Continuation);
                    dispatch(opcode, message.freeze(), &writer, &events).await?;
                    break;
                }
            }
        }
    }
    .await;

    if let Err(e) = result {
        tracing::debug!(error = %e, "WebSocket read loop ended");
    }
    events.on_stop();
}

async fn dispatch(
    opcode: Opcode,
    data: Bytes,
    writer: &SharedWriter,
    events: &Arc<dyn WsEvents>,
) -> Result<(), WsError> {
    match opcode {
        Opcode::Continuation => events.on_unexpected(opcode.as_u8(), data),
        Opcode::Text => events.on_text(&String::from_utf8_lossy(&data)),
        Opcode::Binary => events.on_binary(data),
        Opcode::Close => events.on_close(data),
        Opcode::Ping => {
            let mut writer = writer.lock().await;
            frame::write_frame(&mut *writer, Opcode::Pong, None, &[]).await?;
        }
        Opcode::Pong => {}
        Opcode::Reserved(code) => events.on_reserved(code, data),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use tokio::io::AsyncWriteExt as _;

    use crate::ws::frame::{encode_frame, read_frame};

    use super::*;

    #[derive(Default)]
    struct RecordingEvents {
        text: Mutex<Vec<String>>,
        binary: Mutex<Vec<Bytes>>,
        closed: AtomicBool,
        stopped: AtomicBool,
    }

    impl WsEvents for RecordingEvents {
        fn on_text(&self, text: &str) {
            self.text.lock().unwrap().push(text.to_string());
        }
        fn on_binary(&self, data: Bytes) {
            self.binary.lock().unwrap().push(data);
        }
        fn on_close(&self, _data: Bytes) {
            self.closed.store(true, Ordering::SeqCst);
        }
        fn on_stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    async fn wait_for(flag: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !flag() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_binary_message_dispatch() {
        let (server_side, mut client_side) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(server_side);
        let events = Arc::new(RecordingEvents::default());
        let ws = WsStream::start(read_half, write_half, events.clone());

        let frame = encode_frame(Opcode::Binary, Some(0x0102_0304), b"payload");
        client_side.write_all(&frame).await.unwrap();

        wait_for(|| !events.binary.lock().unwrap().is_empty()).await;
        assert_eq!(events.binary.lock().unwrap()[0], Bytes::from_static(b"payload"));

        ws.close(true).await;
    }

    #[tokio::test]
    async fn test_fragmented_text_accumulates() {
        let (server_side, mut client_side) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(server_side);
        let events = Arc::new(RecordingEvents::default());
        let ws = WsStream::start(read_half, write_half, events.clone());

        // Text frame without FIN, then a continuation with FIN.
        client_side.write_all(&[0x01, 0x03]).await.unwrap();
        client_side.write_all(b"hel").await.unwrap();
        client_side.write_all(&[0x80, 0x02]).await.unwrap();
        client_side.write_all(b"lo").await.unwrap();

        wait_for(|| !events.text.lock().unwrap().is_empty()).await;
        assert_eq!(events.text.lock().unwrap()[0], "hello");

        ws.close(true).await;
    }

    #[tokio::test]
    async fn test_ping_gets_unmasked_empty_pong() {
        let (server_side, mut client_side) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(server_side);
        let events = Arc::new(RecordingEvents::default());
        let ws = WsStream::start(read_half, write_half, events.clone());

        let ping = encode_frame(Opcode::Ping, None, &[]);
        client_side.write_all(&ping).await.unwrap();

        let pong = read_frame(&mut client_side).await.unwrap();
        assert_eq!(pong.opcode, Opcode::Pong);
        assert!(pong.fin);
        assert!(pong.payload.is_empty());

        ws.close(true).await;
    }

    #[tokio::test]
    async fn test_close_frame_reaches_receiver() {
        let (server_side, mut client_side) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(server_side);
        let events = Arc::new(RecordingEvents::default());
        let ws = WsStream::start(read_half, write_half, events.clone());

        let close = encode_frame(Opcode::Close, None, &[]);
        client_side.write_all(&close).await.unwrap();

        wait_for(|| events.closed.load(Ordering::SeqCst)).await;
        ws.close(true).await;
    }

    #[tokio::test]
    async fn test_close_joins_read_loop() {
        let (server_side, _client_side) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(server_side);
        let events = Arc::new(RecordingEvents::default());
        let ws = WsStream::start(read_half, write_half, events.clone());

        // Read loop is idle on a silent peer; close must still join it.
        tokio::time::timeout(Duration::from_secs(2), ws.close(true))
            .await
            .unwrap();
        assert!(events.stopped.load(Ordering::SeqCst));
    }
}
