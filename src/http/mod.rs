//! Minimal hand-written HTTP/1.1 server
//!
//! Implements just enough of HTTP/1.1 to serve ordinary request/response
//! pairs, indefinitely streamed bodies and protocol upgrades, without an
//! external HTTP library:
//!
//! - request-head parsing as an explicit state machine ([`request`]),
//! - case-insensitive multi-value headers ([`headers`]),
//! - a per-connection exchange with header plumbing and raw stream access
//!   ([`exchange`]),
//! - a longest-prefix router and bounded worker pool ([`server`]).
//!
//! No TLS, no HTTP/2, no chunked transfer-encoding: a streamed body simply
//! keeps the connection open and pushes bytes until the handler returns.

pub mod exchange;
pub mod headers;
pub mod request;
pub mod server;

pub use exchange::{BodyLength, Exchange};
pub use headers::Headers;
pub use request::{RequestHead, RequestTarget};
pub use server::{HttpServer, RouteHandler, ServerConfig};
