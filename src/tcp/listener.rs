//! Single-connection TCP server
//!
//! Owns a listening socket, runs an accept loop on a dedicated task and
//! services one peer connection at a time: the connection handler executes
//! on the accept-loop task itself, so the next accept only happens after the
//! current handler returns.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Business logic run for each accepted connection
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Service one accepted connection until done or `shutdown` fires
    async fn run(&self, stream: TcpStream, shutdown: CancellationToken) -> io::Result<()>;
}

/// Lifecycle observer for a [`SingleConnServer`]
///
/// All methods default to no-ops; subscribers override what they need.
pub trait TcpServerEvents: Send + Sync {
    /// Bind finished; `error` is set when the bind failed (fatal)
    fn on_establishing(&self, _addr: Option<SocketAddr>, _error: Option<&io::Error>) {}
    /// A peer connection was accepted
    fn on_connected(&self, _peer: SocketAddr) {}
    /// An accepted connection failed with an I/O error
    fn on_client_error(&self, _error: &io::Error) {}
    /// A connection handler returned (peer gone or handler finished)
    fn on_connection_done(&self, _peer: SocketAddr) {}
    /// The accept loop fully exited
    fn on_done(&self) {}
}

/// Accept-one-connection-at-a-time TCP server
///
/// A stopped server is not restartable; sessions build fresh instances.
pub struct SingleConnServer<H: ConnectionHandler> {
    id: String,
    bind_addr: SocketAddr,
    handler: Arc<H>,
    events: Vec<Arc<dyn TcpServerEvents>>,
    token: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl<H: ConnectionHandler> SingleConnServer<H> {
    /// Create a server for the given bind address (port 0 for ephemeral)
    pub fn new(id: impl Into<String>, bind_addr: SocketAddr, handler: H) -> Self {
        Self {
            id: id.into(),
            bind_addr,
            handler: Arc::new(handler),
            events: Vec::new(),
            token: CancellationToken::new(),
            accept_task: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// Subscribe a lifecycle observer; must happen before `start()`
    pub fn add_listener(&mut self, listener: Arc<dyn TcpServerEvents>) {
        self.events.push(listener);
    }

    /// Local address after a successful `start()`
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap()
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancellation token governing the accept loop and its connections
    pub fn shutdown_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Bind and spawn the accept loop; idempotent
    ///
    /// A bind failure is reported via `on_establishing` and returned; the
    /// loop is never spawned in that case.
    pub async fn start(&self) -> Result<SocketAddr> {
        if let Some(addr) = self.local_addr() {
            return Ok(addr);
        }

        let listener = match TcpListener::bind(self.bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(server = %self.id, addr = %self.bind_addr, error = %e, "Bind failed");
                for ev in &self.events {
                    ev.on_establishing(None, Some(&e));
                }
                return Err(e.into());
            }
        };
        let addr = listener.local_addr()?;
        *self.local_addr.lock().unwrap() = Some(addr);
        tracing::info!(server = %self.id, addr = %addr, "TCP server listening");
        for ev in &self.events {
            ev.on_establishing(Some(addr), None);
        }

        let id = self.id.clone();
        let handler = Arc::clone(&self.handler);
        let events = self.events.clone();
        let token = self.token.clone();
        let task = tokio::spawn(accept_loop(id, listener, handler, events, token));
        *self.accept_task.lock().unwrap() = Some(task);
        Ok(addr)
    }

    /// Stop the accept loop and join it
    ///
    /// Unblocks a pending accept or connection handler; no observer
    /// callbacks fire after this returns.
    pub async fn stop(&self) {
        self.token.cancel();
        let task = self.accept_task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

async fn accept_loop<H: ConnectionHandler>(
    id: String,
    listener: TcpListener,
    handler: Arc<H>,
    events: Vec<Arc<dyn TcpServerEvents>>,
    token: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                let _ = stream.set_nodelay(true);
                // Close must not block on unsent data; a live feed has
                // nothing worth draining.
                let _ = stream.set_linger(None);
                tracing::debug!(server = %id, peer = %peer, "Connection accepted");
                for ev in &events {
                    ev.on_connected(peer);
                }

                let result = tokio::select! {
                    _ = token.cancelled() => break,
                    result = handler.run(stream, token.child_token()) => result,
                };
                if let Err(e) = result {
                    tracing::debug!(server = %id, peer = %peer, error = %e, "Connection error");
                    for ev in &events {
                        ev.on_client_error(&e);
                    }
                }
                tracing::debug!(server = %id, peer = %peer, "Connection done");
                for ev in &events {
                    ev.on_connection_done(peer);
                }
            }
            Err(e) => {
                tracing::error!(server = %id, error = %e, "Failed to accept connection");
                for ev in &events {
                    ev.on_client_error(&e);
                }
            }
        }
    }

    tracing::debug!(server = %id, "Accept loop exited");
    for ev in &events {
        ev.on_done();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl ConnectionHandler for EchoHandler {
        async fn run(&self, mut stream: TcpStream, _shutdown: CancellationToken) -> io::Result<()> {
            let mut buf = [0u8; 64];
            loop {
                let n = stream.read(&mut buf).await?;
                if n == 0 {
                    return Ok(());
                }
                stream.write_all(&buf[..n]).await?;
            }
        }
    }

    #[derive(Default)]
    struct CountingEvents {
        connected: AtomicUsize,
        connection_done: AtomicUsize,
        done: AtomicUsize,
    }

    impl TcpServerEvents for CountingEvents {
        fn on_connected(&self, _peer: SocketAddr) {
            self.connected.fetch_add(1, Ordering::SeqCst);
        }
        fn on_connection_done(&self, _peer: SocketAddr) {
            self.connection_done.fetch_add(1, Ordering::SeqCst);
        }
        fn on_done(&self) {
            self.done.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_serves_connections_serially() {
        let events = Arc::new(CountingEvents::default());
        let mut server =
            SingleConnServer::new("echo", "127.0.0.1:0".parse().unwrap(), EchoHandler);
        server.add_listener(events.clone());
        let addr = server.start().await.unwrap();

        for _ in 0..2 {
            let mut client = TcpStream::connect(addr).await.unwrap();
            client.write_all(b"ping").await.unwrap();
            let mut buf = [0u8; 4];
            client.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"ping");
            drop(client);
        }

        // Both connections must finish before stop for deterministic counts.
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while events.connection_done.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        server.stop().await;
        assert_eq!(events.connected.load(Ordering::SeqCst), 2);
        assert_eq!(events.done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bind_failure_reports_establishing() {
        let first = SingleConnServer::new("a", "127.0.0.1:0".parse().unwrap(), EchoHandler);
        let addr = first.start().await.unwrap();

        let second = SingleConnServer::new("b", addr, EchoHandler);
        assert!(second.start().await.is_err());
        assert!(second.local_addr().is_none());

        first.stop().await;
    }

    #[tokio::test]
    async fn test_stop_unblocks_active_connection() {
        let server = SingleConnServer::new("echo", "127.0.0.1:0".parse().unwrap(), EchoHandler);
        let addr = server.start().await.unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"x").await.unwrap();
        let mut buf = [0u8; 1];
        client.read_exact(&mut buf).await.unwrap();

        // Handler is blocked on read; stop must still return promptly.
        tokio::time::timeout(std::time::Duration::from_secs(2), server.stop())
            .await
            .unwrap();
        assert!(server.is_stopped());
    }
}
