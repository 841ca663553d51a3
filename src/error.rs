//! Crate error types
//!
//! Wire-level failures are split by protocol layer so callers can tell a
//! malformed HTTP head from a torn WebSocket frame without string matching.

use std::io;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// Socket-level I/O failure
    Io(io::Error),
    /// HTTP request framing failure
    Http(HttpError),
    /// WebSocket framing failure
    WebSocket(WsError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Http(e) => write!(f, "HTTP error: {}", e),
            Error::WebSocket(e) => write!(f, "WebSocket error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Http(e) => Some(e),
            Error::WebSocket(e) => Some(e),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<HttpError> for Error {
    fn from(e: HttpError) -> Self {
        Error::Http(e)
    }
}

impl From<WsError> for Error {
    fn from(e: WsError) -> Self {
        Error::WebSocket(e)
    }
}

/// Error while parsing an HTTP request head
#[derive(Debug)]
pub enum HttpError {
    /// Request line does not have method, target and version
    BadRequestLine(String),
    /// Version field does not start with `HTTP/`
    NotHttp(String),
    /// Peer closed the connection before the head was complete
    UnexpectedEof,
    /// Peer stayed silent past the read timeout
    Timeout,
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpError::BadRequestLine(line) => write!(f, "illegal request line: {:?}", line),
            HttpError::NotHttp(version) => write!(f, "non-http request version: {:?}", version),
            HttpError::UnexpectedEof => write!(f, "connection closed before request head"),
            HttpError::Timeout => write!(f, "timed out reading request head"),
        }
    }
}

impl std::error::Error for HttpError {}

/// Error while reading a WebSocket frame
#[derive(Debug)]
pub enum WsError {
    /// End of stream in the middle of a frame
    UnexpectedEof,
    /// Frame header declared a payload above the inbound limit
    FrameTooLarge(u64),
    /// Socket-level failure during a frame read/write
    Io(io::Error),
}

impl std::fmt::Display for WsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WsError::UnexpectedEof => write!(f, "end of stream inside WebSocket frame"),
            WsError::FrameTooLarge(length) => {
                write!(f, "declared WebSocket payload too large: {} bytes", length)
            }
            WsError::Io(e) => write!(f, "WebSocket I/O error: {}", e),
        }
    }
}

impl std::error::Error for WsError {}

impl From<io::Error> for WsError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            WsError::UnexpectedEof
        } else {
            WsError::Io(e)
        }
    }
}
