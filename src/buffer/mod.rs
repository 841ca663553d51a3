//! Bounded, lossy buffering for live media
//!
//! A live feed has no replay requirement, so every buffer here prefers
//! freshness over completeness: overflow drops data instead of blocking the
//! producer. The [`PreemptiveBuffer`] feeds the encoder-side TCP sockets,
//! while [`ClientRegistry`] fans ingest chunks out to per-client bounded
//! channels.

pub mod client;
pub mod preemptive;

pub use client::{ClientGuard, ClientRegistry};
pub use preemptive::PreemptiveBuffer;
