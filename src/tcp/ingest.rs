//! TCP ingest reader
//!
//! Accepts the external encoder's output connection and turns the raw byte
//! stream into discrete chunks. Every chunk is handed to the tap callback
//! (the gateway's fan-out) and, unless a filter rejects it, offered to an
//! internal primary buffer for single-consumer use.
//!
//! The peer closing its write side is an error here: losing the single
//! producer is fatal to the whole streaming session, and the listener's
//! observer chain reacts to the resulting `on_connection_done`.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::buffer::PreemptiveBuffer;
use crate::error::Result;
use crate::tcp::listener::{ConnectionHandler, SingleConnServer, TcpServerEvents};

/// Decides whether a chunk should still be queued to the primary buffer
pub type ChunkFilter = Box<dyn Fn(&Bytes) -> bool + Send + Sync>;

/// Observes every chunk read from the ingest connection
pub type ChunkTap = Box<dyn Fn(&Bytes) + Send + Sync>;

struct IngestHandler {
    max_chunk_size: usize,
    read_timeout: Duration,
    tap: Option<ChunkTap>,
    filters: Vec<ChunkFilter>,
    primary: Arc<PreemptiveBuffer>,
}

#[async_trait]
impl ConnectionHandler for IngestHandler {
    async fn run(&self, mut stream: TcpStream, shutdown: CancellationToken) -> io::Result<()> {
        let mut buf = vec![0u8; self.max_chunk_size];
        loop {
            let read = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                read = timeout(self.read_timeout, stream.read(&mut buf)) => match read {
                    Ok(read) => read?,
                    Err(_) => {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "ingest connection silent past read timeout",
                        ))
                    }
                },
            };
            if read == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "ingest input stream is closed",
                ));
            }

            let chunk = Bytes::copy_from_slice(&buf[..read]);
            if let Some(tap) = &self.tap {
                tap(&chunk);
            }
            if self.filters.iter().all(|filter| filter(&chunk)) {
                self.primary.put(chunk);
            }
        }
    }
}

/// Single-connection server reading the encoder's output stream
pub struct IngestReader {
    server: SingleConnServer<IngestHandler>,
    primary: Arc<PreemptiveBuffer>,
}

impl IngestReader {
    pub fn builder(id: impl Into<String>, bind_addr: SocketAddr) -> IngestReaderBuilder {
        IngestReaderBuilder {
            id: id.into(),
            bind_addr,
            max_chunk_size: 0x10000,
            buffer_capacity: 10,
            read_timeout: Duration::from_secs(60),
            tap: None,
            filters: Vec::new(),
            events: Vec::new(),
        }
    }

    pub async fn start(&self) -> Result<SocketAddr> {
        let addr = self.server.start().await?;
        self.primary.start();
        Ok(addr)
    }

    pub async fn stop(&self) {
        self.primary.suspend();
        self.server.stop().await;
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }

    /// Pop the oldest chunk from the primary buffer
    pub fn read(&self) -> Option<Bytes> {
        self.primary.next()
    }
}

/// Builder collecting taps, filters and observers before the reader starts
pub struct IngestReaderBuilder {
    id: String,
    bind_addr: SocketAddr,
    max_chunk_size: usize,
    buffer_capacity: usize,
    read_timeout: Duration,
    tap: Option<ChunkTap>,
    filters: Vec<ChunkFilter>,
    events: Vec<Arc<dyn TcpServerEvents>>,
}

impl IngestReaderBuilder {
    /// Upper bound for a single read (and therefore a single chunk)
    pub fn max_chunk_size(mut self, size: usize) -> Self {
        self.max_chunk_size = size;
        self
    }

    /// Capacity of the internal primary buffer, in chunks
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Callback invoked for every chunk, before filtering
    pub fn tap(mut self, tap: impl Fn(&Bytes) + Send + Sync + 'static) -> Self {
        self.tap = Some(Box::new(tap));
        self
    }

    /// Add a filter; a chunk reaches the primary buffer only if all pass
    pub fn filter(mut self, filter: impl Fn(&Bytes) -> bool + Send + Sync + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn listener(mut self, listener: Arc<dyn TcpServerEvents>) -> Self {
        self.events.push(listener);
        self
    }

    pub fn build(self) -> IngestReader {
        let primary = Arc::new(PreemptiveBuffer::new(self.buffer_capacity));
        let handler = IngestHandler {
            max_chunk_size: self.max_chunk_size,
            read_timeout: self.read_timeout,
            tap: self.tap,
            filters: self.filters,
            primary: Arc::clone(&primary),
        };
        let mut server = SingleConnServer::new(self.id, self.bind_addr, handler);
        for ev in self.events {
            server.add_listener(ev);
        }
        IngestReader { server, primary }
    }
}
