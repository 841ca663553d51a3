//! From-scratch WebSocket (RFC 6455) codec
//!
//! Three layers:
//!
//! - [`handshake`]: pure accept-key derivation for the HTTP upgrade,
//! - [`frame`]: frame encode/decode including masking and 16/64-bit
//!   extended payload lengths,
//! - [`stream`]: a background read loop over an upgraded connection,
//!   dispatching complete messages to a receiver interface and serializing
//!   outbound writes.
//!
//! No compression extensions and no fragmented frame emission; every
//! outgoing frame carries FIN.

pub mod frame;
pub mod handshake;
pub mod stream;

pub use frame::{Frame, Opcode};
pub use handshake::accept_key;
pub use stream::{WsEvents, WsStream};
