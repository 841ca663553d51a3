//! Gateway configuration

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Invoked once when the gateway stops, whatever triggered the stop
pub type StopCallback = Arc<dyn Fn() + Send + Sync>;

/// Broadcast gateway configuration options
#[derive(Clone)]
pub struct GatewayConfig {
    /// MIME type announced for the broadcast stream
    pub mime: String,

    /// Address the HTTP server binds to
    pub http_addr: SocketAddr,

    /// Address the ingest reader binds to; loopback with an ephemeral port
    /// by default, the encoder runs on the same host
    pub ingest_addr: SocketAddr,

    /// Resource path serving the raw stream
    pub stream_path: String,

    /// Resource path serving the WebSocket stream
    pub ws_path: String,

    /// Per-client buffer capacity, in chunks
    pub client_buffer_capacity: usize,

    /// Upper bound for a single ingest read
    pub ingest_chunk_size: usize,

    /// Ingest primary buffer capacity, in chunks
    pub ingest_buffer_capacity: usize,

    /// Ingest connection read timeout
    pub ingest_read_timeout: Duration,

    /// Maximum concurrently serviced HTTP connections
    pub max_http_workers: usize,

    /// Time allowed for an HTTP client to deliver its request head
    pub head_read_timeout: Duration,

    /// Called after the gateway has fully stopped
    pub on_stop: Option<StopCallback>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            mime: "video/MP2T".to_string(),
            http_addr: "0.0.0.0:8080".parse().unwrap(),
            ingest_addr: "127.0.0.1:0".parse().unwrap(),
            stream_path: "/stream.ts".to_string(),
            ws_path: "/wsstream.ts".to_string(),
            client_buffer_capacity: 32,
            ingest_chunk_size: 0x10000,
            ingest_buffer_capacity: 10,
            ingest_read_timeout: Duration::from_secs(60),
            max_http_workers: 8,
            head_read_timeout: Duration::from_secs(10),
            on_stop: None,
        }
    }
}

impl GatewayConfig {
    /// Create a new config with a custom HTTP bind address
    pub fn with_http_addr(addr: SocketAddr) -> Self {
        Self {
            http_addr: addr,
            ..Default::default()
        }
    }

    /// Set the stream MIME type
    pub fn mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = mime.into();
        self
    }

    /// Set the ingest bind address
    pub fn ingest_addr(mut self, addr: SocketAddr) -> Self {
        self.ingest_addr = addr;
        self
    }

    /// Set the raw-stream resource path
    pub fn stream_path(mut self, path: impl Into<String>) -> Self {
        self.stream_path = path.into();
        self
    }

    /// Set the WebSocket-stream resource path
    pub fn ws_path(mut self, path: impl Into<String>) -> Self {
        self.ws_path = path.into();
        self
    }

    /// Set the per-client buffer capacity
    pub fn client_buffer_capacity(mut self, capacity: usize) -> Self {
        self.client_buffer_capacity = capacity.max(1);
        self
    }

    /// Set the ingest chunk size
    pub fn ingest_chunk_size(mut self, size: usize) -> Self {
        self.ingest_chunk_size = size.max(1);
        self
    }

    /// Set the ingest primary buffer capacity
    pub fn ingest_buffer_capacity(mut self, capacity: usize) -> Self {
        self.ingest_buffer_capacity = capacity.max(1);
        self
    }

    /// Set the ingest read timeout
    pub fn ingest_read_timeout(mut self, timeout: Duration) -> Self {
        self.ingest_read_timeout = timeout;
        self
    }

    /// Set the maximum concurrent HTTP workers
    pub fn max_http_workers(mut self, max: usize) -> Self {
        self.max_http_workers = max.max(1);
        self
    }

    /// Set the request-head read timeout
    pub fn head_read_timeout(mut self, timeout: Duration) -> Self {
        self.head_read_timeout = timeout;
        self
    }

    /// Set the stop callback
    pub fn on_stop(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_stop = Some(Arc::new(callback));
        self
    }
}
