//! Loopback TCP plumbing between the gateway and the external encoder
//!
//! Two single-connection servers bridge the encoder process:
//!
//! ```text
//!   frame producer ──► RelayWriter ──► encoder stdin-equivalent (TCP)
//!   encoder output ──► IngestReader ──► fan-out to client buffers
//! ```
//!
//! Both accept exactly one peer at a time; concurrency comes from running
//! multiple server instances, not multiple connections per instance.

pub mod ingest;
pub mod listener;
pub mod relay;

pub use ingest::IngestReader;
pub use listener::{ConnectionHandler, SingleConnServer, TcpServerEvents};
pub use relay::RelayWriter;
