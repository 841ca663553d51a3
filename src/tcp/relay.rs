//! TCP relay writer
//!
//! The converse of the ingest reader: accepts the external encoder's input
//! connection and drains a preemptive buffer into it. The frame producer
//! calls [`RelayWriter::write`] at its own pace; overflow policy lives in
//! the buffer, so the producer never blocks on a slow or absent encoder.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::buffer::PreemptiveBuffer;
use crate::error::Result;
use crate::tcp::listener::{ConnectionHandler, SingleConnServer, TcpServerEvents};

const POLL_INTERVAL: Duration = Duration::from_millis(2);

struct RelayHandler {
    buffer: Arc<PreemptiveBuffer>,
}

#[async_trait]
impl ConnectionHandler for RelayHandler {
    async fn run(&self, mut stream: TcpStream, shutdown: CancellationToken) -> io::Result<()> {
        loop {
            match self.buffer.next() {
                Some(chunk) => {
                    stream.write_all(&chunk).await?;
                    stream.flush().await?;
                }
                None => {
                    tokio::select! {
                        _ = shutdown.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(POLL_INTERVAL) => {}
                    }
                }
            }
        }
    }
}

/// Single-connection server feeding buffered chunks to the encoder input
pub struct RelayWriter {
    server: SingleConnServer<RelayHandler>,
    buffer: Arc<PreemptiveBuffer>,
}

impl RelayWriter {
    /// Create a writer with a buffer of `buffer_capacity` chunks
    pub fn new(id: impl Into<String>, buffer_capacity: usize, bind_addr: SocketAddr) -> Self {
        let buffer = Arc::new(PreemptiveBuffer::new(buffer_capacity));
        let server = SingleConnServer::new(
            id,
            bind_addr,
            RelayHandler {
                buffer: Arc::clone(&buffer),
            },
        );
        Self { server, buffer }
    }

    /// Subscribe a lifecycle observer; must happen before `start()`
    pub fn add_listener(&mut self, listener: Arc<dyn TcpServerEvents>) {
        self.server.add_listener(listener);
    }

    pub async fn start(&self) -> Result<SocketAddr> {
        let addr = self.server.start().await?;
        self.buffer.start();
        Ok(addr)
    }

    pub async fn stop(&self) {
        self.buffer.suspend();
        self.server.stop().await;
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }

    /// Queue a chunk for the connected peer; never blocks
    pub fn write(&self, data: Bytes) {
        self.buffer.put(data);
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn test_drains_buffer_to_peer_in_order() {
        let writer = RelayWriter::new("relay", 8, "127.0.0.1:0".parse().unwrap());
        let addr = writer.start().await.unwrap();

        let mut consumer = TcpStream::connect(addr).await.unwrap();
        writer.write(Bytes::from_static(b"one"));
        writer.write(Bytes::from_static(b"two"));

        let mut received = vec![0u8; 6];
        tokio::time::timeout(Duration::from_secs(2), consumer.read_exact(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&received, b"onetwo");

        writer.stop().await;
    }

    #[tokio::test]
    async fn test_stop_closes_peer_connection() {
        let writer = RelayWriter::new("relay", 4, "127.0.0.1:0".parse().unwrap());
        let addr = writer.start().await.unwrap();

        let mut consumer = TcpStream::connect(addr).await.unwrap();
        writer.stop().await;

        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(2), consumer.read(&mut buf))
            .await
            .unwrap();
        match read {
            Ok(0) | Err(_) => {}
            Ok(n) => panic!("expected closed connection, read {} bytes", n),
        }
    }
}
