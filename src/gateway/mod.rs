//! Broadcast gateway orchestration
//!
//! Wires the pieces into one session: an [`IngestReader`] accepting the
//! encoder's TCP connection, a [`ClientRegistry`] fanning every ingest chunk
//! out to connected clients, and an [`HttpServer`] serving the raw stream,
//! the WebSocket stream and a player page.
//!
//! ```text
//! encoder ──TCP──▶ IngestReader ──tap──▶ ClientRegistry
//!                                             │ fan-out
//!                              ┌──────────────┼──────────────┐
//!                         HTTP client    HTTP client     WS client
//! ```
//!
//! Losing the ingest connection ends the session: a lifecycle observer on
//! the ingest server triggers [`BroadcastGateway::stop`].

pub mod config;
pub mod routes;
pub mod templates;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::buffer::ClientRegistry;
use crate::error::Result;
use crate::gateway::routes::{StaticRoute, StreamRoute, WsRoute};
use crate::http::{HttpServer, ServerConfig};
use crate::tcp::{IngestReader, TcpServerEvents};

pub use config::GatewayConfig;

/// Servers of one active session, stored atomically under the session lock
struct Session {
    http: Arc<HttpServer>,
    ingest: Arc<IngestReader>,
    http_addr: SocketAddr,
}

struct GatewayInner {
    config: GatewayConfig,
    running: AtomicBool,
    registry: Arc<ClientRegistry>,
    // Serializes the whole start/stop transition. A stop landing while a
    // start is in flight waits for the session to be stored, then tears it
    // down, so no server can outlive the running flag.
    session: tokio::sync::Mutex<Option<Session>>,
    http_addr: Mutex<Option<SocketAddr>>,
    ingest_addr: Mutex<Option<SocketAddr>>,
}

/// One live broadcast session
///
/// Cheaply cloneable handle; `start()` and `stop()` are idempotent and safe
/// to race. A stopped gateway can be started again, fresh servers are built
/// per session.
#[derive(Clone)]
pub struct BroadcastGateway {
    inner: Arc<GatewayInner>,
}

/// Stops the gateway when the single ingest connection ends
struct IngestObserver {
    gateway: BroadcastGateway,
}

impl TcpServerEvents for IngestObserver {
    fn on_connection_done(&self, peer: SocketAddr) {
        tracing::info!(peer = %peer, "Ingest connection lost, stopping gateway");
        let gateway = self.gateway.clone();
        tokio::spawn(async move {
            gateway.stop().await;
        });
    }
}

impl BroadcastGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                config,
                running: AtomicBool::new(false),
                registry: Arc::new(ClientRegistry::new()),
                session: tokio::sync::Mutex::new(None),
                http_addr: Mutex::new(None),
                ingest_addr: Mutex::new(None),
            }),
        }
    }

    /// HTTP address clients connect to, once started
    pub fn http_addr(&self) -> Option<SocketAddr> {
        *self.inner.http_addr.lock().unwrap()
    }

    /// Ingest address the external encoder connects to, once started
    pub fn ingest_addr(&self) -> Option<SocketAddr> {
        *self.inner.ingest_addr.lock().unwrap()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Connected stream clients (HTTP and WebSocket)
    pub fn client_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Start the ingest reader and the HTTP server
    ///
    /// Returns the HTTP address. A second `start()` on a running gateway is
    /// a no-op returning the existing address.
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut session = self.inner.session.lock().await;
        if let Some(active) = session.as_ref() {
            return Ok(active.http_addr);
        }
        let config = &self.inner.config;

        let registry = Arc::clone(&self.inner.registry);
        let ingest = Arc::new(
            IngestReader::builder("ingest", config.ingest_addr)
                .max_chunk_size(config.ingest_chunk_size)
                .buffer_capacity(config.ingest_buffer_capacity)
                .read_timeout(config.ingest_read_timeout)
                .tap(move |chunk| registry.fan_out(chunk))
                .listener(Arc::new(IngestObserver {
                    gateway: self.clone(),
                }))
                .build(),
        );
        let ingest_addr = ingest.start().await?;

        let http_addr_slot: Arc<OnceLock<SocketAddr>> = Arc::new(OnceLock::new());
        let mut http = HttpServer::new(
            ServerConfig::with_addr(config.http_addr)
                .max_workers(config.max_http_workers)
                .head_read_timeout(config.head_read_timeout),
        );
        http.route(
            &config.stream_path,
            Arc::new(StreamRoute::new(
                &config.mime,
                Arc::clone(&self.inner.registry),
                config.client_buffer_capacity,
            )),
        );
        http.route(
            &config.ws_path,
            Arc::new(WsRoute::new(
                Arc::clone(&self.inner.registry),
                config.client_buffer_capacity,
            )),
        );
        http.route(
            "/",
            Arc::new(StaticRoute::new(
                &config.mime,
                &config.stream_path,
                &config.ws_path,
                Arc::clone(&http_addr_slot),
            )),
        );

        let http = Arc::new(http);
        let http_addr = match http.start().await {
            Ok(addr) => addr,
            Err(e) => {
                ingest.stop().await;
                return Err(e);
            }
        };
        let _ = http_addr_slot.set(http_addr);

        *session = Some(Session {
            http,
            ingest,
            http_addr,
        });
        *self.inner.ingest_addr.lock().unwrap() = Some(ingest_addr);
        *self.inner.http_addr.lock().unwrap() = Some(http_addr);
        self.inner.running.store(true, Ordering::SeqCst);

        tracing::info!(
            http = %http_addr,
            ingest = %ingest_addr,
            mime = %config.mime,
            "Broadcast gateway started"
        );
        Ok(http_addr)
    }

    /// Stop both servers and wait for every connection task to exit
    ///
    /// Idempotent; invokes the configured stop callback once per session.
    pub async fn stop(&self) {
        let mut session = self.inner.session.lock().await;
        let active = match session.take() {
            Some(active) => active,
            None => return,
        };
        self.inner.running.store(false, Ordering::SeqCst);

        active.http.stop().await;
        active.ingest.stop().await;
        *self.inner.http_addr.lock().unwrap() = None;
        *self.inner.ingest_addr.lock().unwrap() = None;

        tracing::info!("Broadcast gateway stopped");
        if let Some(callback) = &self.inner.config.on_stop {
            callback();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    use super::*;

    fn test_config() -> GatewayConfig {
        GatewayConfig::with_http_addr("127.0.0.1:0".parse().unwrap())
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let gateway = BroadcastGateway::new(test_config());
        let first = gateway.start().await.unwrap();
        let second = gateway.start().await.unwrap();
        assert_eq!(first, second);
        assert!(gateway.is_running());
        gateway.stop().await;
        assert!(!gateway.is_running());
    }

    #[tokio::test]
    async fn test_stop_callback_fires_once() {
        let stops = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&stops);
        let gateway = BroadcastGateway::new(test_config().on_stop(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        gateway.start().await.unwrap();
        gateway.stop().await;
        gateway.stop().await;
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_racing_start_leaves_no_live_session() {
        for _ in 0..16 {
            let gateway = BroadcastGateway::new(test_config());
            let stopper = gateway.clone();
            let (started, _) = tokio::join!(gateway.start(), stopper.stop());

            // Whichever side won, a final stop must leave nothing listening.
            gateway.stop().await;
            assert!(!gateway.is_running());
            assert!(gateway.http_addr().is_none());
            assert!(gateway.ingest_addr().is_none());
            if let Ok(addr) = started {
                assert!(TcpStream::connect(addr).await.is_err());
            }
        }
    }

    #[tokio::test]
    async fn test_ingest_loss_stops_gateway() {
        let gateway = BroadcastGateway::new(test_config());
        gateway.start().await.unwrap();
        let ingest_addr = gateway.ingest_addr().unwrap();

        let mut encoder = TcpStream::connect(ingest_addr).await.unwrap();
        encoder.write_all(b"ts-data").await.unwrap();
        encoder.flush().await.unwrap();
        drop(encoder);

        tokio::time::timeout(Duration::from_secs(5), async {
            while gateway.http_addr().is_some() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(!gateway.is_running());
    }
}
