//! WebSocket opening-handshake key derivation
//!
//! RFC 6455 section 4.2.2: the server proves it understood the upgrade by
//! echoing Base64(SHA-1(client key + magic GUID)).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};

/// Fixed GUID appended to the client key (RFC 6455)
const WS_MAGIC_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Derive the `Sec-WebSocket-Accept` value for a client key
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_MAGIC_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}
