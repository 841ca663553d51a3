//! streamgate: a TCP-to-HTTP/WebSocket live media relay gateway
//!
//! An external encoder pushes a raw media byte stream (MPEG-TS by default)
//! over a plain TCP connection; the gateway fans it out live to any number
//! of HTTP and WebSocket clients. Everything on the wire is hand-rolled:
//! a minimal HTTP/1.1 server, an RFC 6455 WebSocket codec and two
//! single-connection TCP servers bridging the encoder process.
//!
//! ```no_run
//! use streamgate::{BroadcastGateway, GatewayConfig};
//!
//! #[tokio::main]
//! async fn main() -> streamgate::Result<()> {
//!     let gateway = BroadcastGateway::new(
//!         GatewayConfig::with_http_addr("0.0.0.0:8080".parse().unwrap()),
//!     );
//!     let http_addr = gateway.start().await?;
//!     let ingest_addr = gateway.ingest_addr().unwrap();
//!     println!("serving http://{http_addr}/, encoder feeds {ingest_addr}");
//!     tokio::signal::ctrl_c().await?;
//!     gateway.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! Delivery favors freshness over completeness: each client has a bounded
//! chunk buffer and a slow client silently loses chunks instead of stalling
//! ingest or its neighbours. This is a live feed, not a file download.

pub mod buffer;
pub mod error;
pub mod gateway;
pub mod http;
pub mod tcp;
pub mod ws;

pub use error::{Error, Result};
pub use gateway::{BroadcastGateway, GatewayConfig};
