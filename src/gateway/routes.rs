//! HTTP route handlers for the broadcast endpoints
//!
//! Each streaming handler registers a client buffer before announcing the
//! stream, so no chunk published between headers and the first read is
//! missed, and relies on a drop guard for deregistration on every exit
//! path.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::buffer::ClientRegistry;
use crate::error::Result;
use crate::gateway::templates;
use crate::http::{BodyLength, Exchange, Headers, RouteHandler};
use crate::ws::{accept_key, Opcode, WsEvents, WsStream};

fn add_streaming_headers(headers: &mut Headers, mime: &str) {
    headers.add("Content-Type", mime);
    headers.add("Cache-Control", "no-cache, no-store");
    headers.add("Pragma", "no-cache");
    headers.add("Expires", "0");
    headers.add("Connection", "Keep-Alive");
    headers.add("Accept-Ranges", "none");
}

/// Serves the raw broadcast stream as an unbounded HTTP response body
pub struct StreamRoute {
    mime: String,
    registry: Arc<ClientRegistry>,
    buffer_capacity: usize,
}

impl StreamRoute {
    pub fn new(mime: impl Into<String>, registry: Arc<ClientRegistry>, buffer_capacity: usize) -> Self {
        Self {
            mime: mime.into(),
            registry,
            buffer_capacity,
        }
    }
}

#[async_trait]
impl RouteHandler for StreamRoute {
    async fn handle(&self, exchange: &mut Exchange, shutdown: CancellationToken) -> Result<()> {
        match exchange.method() {
            "HEAD" => {
                add_streaming_headers(exchange.response_headers_mut(), &self.mime);
                exchange.send_response_headers(200, BodyLength::None).await?;
                Ok(())
            }
            "GET" => {
                // Register before the headers go out: chunks published while
                // the client is still parsing them are already buffered.
                let (guard, mut rx) = self.registry.register(self.buffer_capacity);
                tracing::info!(client_id = guard.id(), "Stream client connected");

                add_streaming_headers(exchange.response_headers_mut(), &self.mime);
                exchange
                    .send_response_headers(200, BodyLength::Unbounded)
                    .await?;

                loop {
                    let chunk = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        chunk = rx.recv() => match chunk {
                            Some(chunk) => chunk,
                            None => break,
                        },
                    };
                    if exchange.write_body(&chunk).await.is_err() {
                        break;
                    }
                    if exchange.flush().await.is_err() {
                        break;
                    }
                }
                tracing::info!(client_id = guard.id(), "Stream client finished");
                Ok(())
            }
            _ => {
                exchange.send_response_headers(405, BodyLength::None).await?;
                Ok(())
            }
        }
    }
}

/// Translates close/stop notifications from the read loop into a token the
/// write loop selects on
struct PeerCloseEvents {
    closed: CancellationToken,
}

impl WsEvents for PeerCloseEvents {
    fn on_close(&self, _data: Bytes) {
        self.closed.cancel();
    }

    fn on_stop(&self) {
        self.closed.cancel();
    }
}

/// Upgrades the connection and serves the stream as binary WebSocket frames
pub struct WsRoute {
    registry: Arc<ClientRegistry>,
    buffer_capacity: usize,
}

impl WsRoute {
    pub fn new(registry: Arc<ClientRegistry>, buffer_capacity: usize) -> Self {
        Self {
            registry,
            buffer_capacity,
        }
    }

    fn upgrade_requested(exchange: &Exchange) -> bool {
        let connection_ok = exchange
            .request_headers()
            .get("connection")
            .iter()
            .flat_map(|value| value.split(','))
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
        let upgrade_ok = exchange
            .request_headers()
            .get_first("upgrade")
            .map(|value| value.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false);
        connection_ok && upgrade_ok
    }
}

#[async_trait]
impl RouteHandler for WsRoute {
    async fn handle(&self, exchange: &mut Exchange, shutdown: CancellationToken) -> Result<()> {
        if exchange.method() != "GET" {
            exchange.send_response_headers(405, BodyLength::None).await?;
            return Ok(());
        }

        let client_key = exchange
            .request_headers()
            .get_first("sec-websocket-key")
            .map(str::to_string);
        let client_key = match client_key {
            Some(key) if WsRoute::upgrade_requested(exchange) => key,
            _ => {
                tracing::warn!("WebSocket upgrade preconditions not met");
                exchange.send_response_headers(400, BodyLength::None).await?;
                return Ok(());
            }
        };

        let protocol = exchange
            .request_headers()
            .get_first("sec-websocket-protocol")
            .map(str::to_string);

        {
            let headers = exchange.response_headers_mut();
            headers.add("Upgrade", "websocket");
            headers.add("Connection", "Upgrade");
            headers.add("Sec-WebSocket-Accept", &accept_key(&client_key));
            headers.add("Sec-WebSocket-Version", "13");
            if let Some(protocol) = protocol {
                headers.add("Sec-WebSocket-Protocol", &protocol);
            }
        }
        exchange.send_response_headers(101, BodyLength::None).await?;

        let (reader, writer) = match exchange.take_streams() {
            Some(streams) => streams,
            None => return Ok(()),
        };

        let peer_closed = CancellationToken::new();
        let events = Arc::new(PeerCloseEvents {
            closed: peer_closed.clone(),
        });
        let ws = WsStream::start(reader, writer, events);

        let (guard, mut rx) = self.registry.register(self.buffer_capacity);
        tracing::info!(client_id = guard.id(), "WebSocket stream client connected");

        loop {
            let chunk = tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = peer_closed.cancelled() => break,
                chunk = rx.recv() => match chunk {
                    Some(chunk) => chunk,
                    None => break,
                },
            };
            if ws.write_frame(Opcode::Binary, false, &chunk).await.is_err() {
                break;
            }
        }

        ws.close(true).await;
        tracing::info!(client_id = guard.id(), "WebSocket stream client finished");
        Ok(())
    }
}

/// Serves the player page at the root path; anything else is a 404
pub struct StaticRoute {
    mime: String,
    stream_path: String,
    ws_path: String,
    http_addr: Arc<OnceLock<SocketAddr>>,
}

impl StaticRoute {
    pub fn new(
        mime: impl Into<String>,
        stream_path: impl Into<String>,
        ws_path: impl Into<String>,
        http_addr: Arc<OnceLock<SocketAddr>>,
    ) -> Self {
        Self {
            mime: mime.into(),
            stream_path: stream_path.into(),
            ws_path: ws_path.into(),
            http_addr,
        }
    }

    /// Address used in generated links: the client-supplied `Host` when
    /// present, otherwise the bound address
    fn http_address(&self, exchange: &Exchange) -> String {
        if let Some(host) = exchange.request_headers().get_first("host") {
            return host.to_string();
        }
        match self.http_addr.get() {
            Some(addr) => addr.to_string(),
            None => "none".to_string(),
        }
    }
}

#[async_trait]
impl RouteHandler for StaticRoute {
    async fn handle(&self, exchange: &mut Exchange, _shutdown: CancellationToken) -> Result<()> {
        let path = exchange.target().path().to_string();
        if path != "/" && path != "/streamer.html" {
            exchange.send_response_headers(404, BodyLength::None).await?;
            return Ok(());
        }

        let address = self.http_address(exchange);
        let video_link = format!("http://{}{}", address, self.stream_path);
        let ws_link = format!("ws://{}{}", address, self.ws_path);
        let playlist_link = format!("http://{}/playlist.m3u8", address);

        let page = templates::substitute(
            templates::PLAYER_PAGE,
            &[
                ("video.link", &video_link),
                ("wsvideo.link", &ws_link),
                ("playlist.link", &playlist_link),
                ("video.mime", &self.mime),
            ],
        );

        let body = page.into_bytes();
        exchange.response_headers_mut().add("Content-Type", "text/html");
        exchange
            .send_response_headers(200, BodyLength::Fixed(body.len() as u64))
            .await?;
        exchange.write_body(&body).await?;
        Ok(())
    }
}
