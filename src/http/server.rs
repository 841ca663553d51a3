//! HTTP server accept loop and router
//!
//! Routes are registered as `(path prefix, handler)` before start and are
//! read-only afterwards. Lookup prefers an exact full-path match, then the
//! longest matching prefix. A request with no matching route closes the
//! connection without a response; existing clients of the original gateway
//! rely on the dropped connection rather than a generated 404.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::{HttpError, Result};
use crate::http::exchange::Exchange;
use crate::http::request::read_head;

/// Handles requests routed to a registered path prefix
#[async_trait]
pub trait RouteHandler: Send + Sync {
    /// Service one exchange; long-lived streaming loops must watch
    /// `shutdown` so `stop()` can unblock them
    async fn handle(&self, exchange: &mut Exchange, shutdown: CancellationToken) -> Result<()>;
}

type Route = (String, Arc<dyn RouteHandler>);

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    /// Maximum concurrently serviced connections
    pub max_workers: usize,
    /// Time allowed for a client to deliver its request head
    pub head_read_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().unwrap(),
            max_workers: 8,
            head_read_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    pub fn with_addr(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn head_read_timeout(mut self, head_read_timeout: Duration) -> Self {
        self.head_read_timeout = head_read_timeout;
        self
    }
}

/// Minimal HTTP/1.1 server over raw TCP
pub struct HttpServer {
    config: ServerConfig,
    routes: Vec<Route>,
    token: CancellationToken,
    tracker: TaskTracker,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl HttpServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            routes: Vec::new(),
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            accept_task: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// Register a handler for a path prefix; must happen before `start()`
    pub fn route(&mut self, prefix: impl Into<String>, handler: Arc<dyn RouteHandler>) {
        self.routes.push((prefix.into(), handler));
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap()
    }

    /// Active connection count
    pub fn connection_count(&self) -> usize {
        self.tracker.len()
    }

    /// Bind and spawn the accept loop; idempotent
    pub async fn start(&self) -> Result<SocketAddr> {
        if let Some(addr) = self.local_addr() {
            return Ok(addr);
        }

        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let addr = listener.local_addr()?;
        *self.local_addr.lock().unwrap() = Some(addr);
        tracing::info!(addr = %addr, "HTTP server listening");

        let routes: Arc<Vec<Route>> = Arc::new(self.routes.clone());
        let token = self.token.clone();
        let tracker = self.tracker.clone();
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers));
        let head_read_timeout = self.config.head_read_timeout;

        let task = tokio::spawn(async move {
            loop {
                let permit = tokio::select! {
                    _ = token.cancelled() => break,
                    permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };
                let accepted = tokio::select! {
                    _ = token.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Ok((stream, peer)) => {
                        let routes = Arc::clone(&routes);
                        let token = token.clone();
                        tracker.spawn(async move {
                            let _permit = permit;
                            handle_connection(routes, stream, peer, token, head_read_timeout)
                                .await;
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept connection");
                    }
                }
            }
            tracing::debug!("HTTP accept loop exited");
        });
        *self.accept_task.lock().unwrap() = Some(task);
        Ok(addr)
    }

    /// Stop the accept loop, cancel every serviced connection and wait for
    /// all connection tasks to exit
    pub async fn stop(&self) {
        self.token.cancel();
        let task = self.accept_task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("HTTP server stopped");
    }
}

/// Exact full-path match wins immediately, otherwise the longest prefix
fn find_route(routes: &[Route], path: &str) -> Option<Arc<dyn RouteHandler>> {
    let mut found: Option<&Route> = None;
    for route in routes {
        if !path.starts_with(route.0.as_str()) {
            continue;
        }
        if path == route.0 {
            return Some(Arc::clone(&route.1));
        }
        match found {
            Some((prefix, _)) if route.0.len() < prefix.len() => {}
            _ => found = Some(route),
        }
    }
    found.map(|(_, handler)| Arc::clone(handler))
}

async fn handle_connection(
    routes: Arc<Vec<Route>>,
    stream: TcpStream,
    peer: SocketAddr,
    token: CancellationToken,
    head_read_timeout: Duration,
) {
    let _ = stream.set_nodelay(true);
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let head = tokio::select! {
        _ = token.cancelled() => return,
        head = timeout(head_read_timeout, read_head(&mut reader)) => match head {
            Ok(Ok(head)) => head,
            Ok(Err(e)) => {
                tracing::warn!(peer = %peer, error = %e, "Bad request head");
                return;
            }
            Err(_) => {
                tracing::warn!(peer = %peer, error = %HttpError::Timeout, "Bad request head");
                return;
            }
        },
    };

    let path = head.target.path().to_string();
    let handler = match find_route(&routes, &path) {
        Some(handler) => handler,
        None => {
            // Original behavior: no context means a silently dropped
            // connection, not a 404.
            tracing::warn!(peer = %peer, path = %path, "No route for path, closing connection");
            return;
        }
    };

    tracing::debug!(peer = %peer, method = %head.method, path = %path, "Request routed");
    let mut exchange = Exchange::new(head, reader, write_half);
    if let Err(e) = handler.handle(&mut exchange, token.child_token()).await {
        tracing::warn!(peer = %peer, path = %path, error = %e, "Handler error");
    }
    exchange.close().await;
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use crate::http::exchange::BodyLength;

    use super::*;

    struct FixedHandler {
        body: &'static [u8],
    }

    #[async_trait]
    impl RouteHandler for FixedHandler {
        async fn handle(
            &self,
            exchange: &mut Exchange,
            _shutdown: CancellationToken,
        ) -> Result<()> {
            exchange.response_headers_mut().add("Content-Type", "text/plain");
            exchange
                .send_response_headers(200, BodyLength::Fixed(self.body.len() as u64))
                .await?;
            exchange.write_body(self.body).await?;
            Ok(())
        }
    }

    fn routes_for(prefixes: &[&str]) -> Vec<Route> {
        prefixes
            .iter()
            .map(|p| {
                (
                    p.to_string(),
                    Arc::new(FixedHandler { body: b"" }) as Arc<dyn RouteHandler>,
                )
            })
            .collect()
    }

    #[test]
    fn test_longest_prefix_wins() {
        let routes = routes_for(&["/a", "/a/b"]);

        let found = find_route(&routes, "/a/b/c");
        assert!(Arc::ptr_eq(&found.unwrap(), &routes[1].1));

        let found = find_route(&routes, "/a/x");
        assert!(Arc::ptr_eq(&found.unwrap(), &routes[0].1));
    }

    #[test]
    fn test_exact_match_preferred() {
        let routes = routes_for(&["/", "/stream.ts"]);
        let found = find_route(&routes, "/stream.ts");
        assert!(Arc::ptr_eq(&found.unwrap(), &routes[1].1));
    }

    #[test]
    fn test_no_match_is_none() {
        let routes = routes_for(&["/a"]);
        assert!(find_route(&routes, "/b").is_none());
    }

    #[tokio::test]
    async fn test_serves_fixed_response() {
        let mut server = HttpServer::new(ServerConfig::with_addr("127.0.0.1:0".parse().unwrap()));
        server.route("/hello", Arc::new(FixedHandler { body: b"hi there" }));
        let addr = server.start().await.unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /hello HTTP/1.1\r\nHost: test\r\n\r\n")
            .await
            .unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 8\r\n"));
        assert!(text.ends_with("hi there"));

        server.stop().await;
    }

    #[tokio::test]
    async fn test_unrouted_path_drops_connection() {
        let mut server = HttpServer::new(ServerConfig::with_addr("127.0.0.1:0".parse().unwrap()));
        server.route("/known", Arc::new(FixedHandler { body: b"" }));
        let addr = server.start().await.unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /unknown HTTP/1.1\r\nHost: test\r\n\r\n")
            .await
            .unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert!(response.is_empty());

        server.stop().await;
    }
}
