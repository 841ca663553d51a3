//! Per-connection HTTP exchange
//!
//! Created once the request head is parsed; owns both halves of the socket.
//! Response headers stay mutable until the status line is sent. For protocol
//! upgrades the handler takes the raw streams out of the exchange and keeps
//! using them as a bidirectional channel.

use std::io;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::http::headers::Headers;
use crate::http::request::{RequestHead, RequestTarget};

/// Buffered read half handed to upgrade handlers
pub type ExchangeReader = BufReader<OwnedReadHalf>;

/// How the response body is framed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLength {
    /// No body and no `Content-Length` header
    None,
    /// Fixed-size body; `Content-Length` written unless the handler set one
    Fixed(u64),
    /// Indefinitely streamed body: the connection stays open and bytes are
    /// pushed until the handler returns or the peer disconnects
    Unbounded,
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        101 => "Switching Protocols",
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        100..=199 => "Information",
        201..=299 => "OK",
        300..=399 => "Redirect",
        401..=499 => "Client Error",
        500..=599 => "Server Error",
        _ => "Unknown",
    }
}

fn encode_head(status: u16, body: BodyLength, headers: &Headers) -> BytesMut {
    let mut head = BytesMut::with_capacity(256);
    head.put_slice(format!("HTTP/1.1 {} {}\r\n", status, reason_phrase(status)).as_bytes());

    if let BodyLength::Fixed(length) = body {
        if !headers.contains("content-length") {
            head.put_slice(format!("Content-Length: {}\r\n", length).as_bytes());
        }
    }
    for (name, value) in headers.iter() {
        head.put_slice(format!("{}: {}\r\n", name, value).as_bytes());
    }
    head.put_slice(b"\r\n");
    head
}

/// One HTTP request/response pair on an accepted connection
pub struct Exchange {
    method: String,
    target: RequestTarget,
    request_headers: Headers,
    response_headers: Headers,
    reader: Option<ExchangeReader>,
    writer: Option<OwnedWriteHalf>,
    headers_sent: bool,
    closed: bool,
}

impl Exchange {
    pub fn new(head: RequestHead, reader: ExchangeReader, writer: OwnedWriteHalf) -> Self {
        Self {
            method: head.method,
            target: head.target,
            request_headers: head.headers,
            response_headers: Headers::new(),
            reader: Some(reader),
            writer: Some(writer),
            headers_sent: false,
            closed: false,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn target(&self) -> &RequestTarget {
        &self.target
    }

    pub fn request_headers(&self) -> &Headers {
        &self.request_headers
    }

    pub fn response_headers(&self) -> &Headers {
        &self.response_headers
    }

    /// Mutable response headers; only meaningful before the status line is
    /// sent
    pub fn response_headers_mut(&mut self) -> &mut Headers {
        &mut self.response_headers
    }

    fn writer_mut(&mut self) -> io::Result<&mut OwnedWriteHalf> {
        self.writer.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "exchange streams taken")
        })
    }

    /// Write the status line, accumulated headers and a blank line, then
    /// flush
    pub async fn send_response_headers(
        &mut self,
        status: u16,
        body: BodyLength,
    ) -> io::Result<()> {
        let head = encode_head(status, body, &self.response_headers);
        self.headers_sent = true;
        let writer = self.writer_mut()?;
        writer.write_all(&head).await?;
        writer.flush().await
    }

    /// Write body bytes on the open connection
    pub async fn write_body(&mut self, data: &[u8]) -> io::Result<()> {
        let writer = self.writer_mut()?;
        writer.write_all(data).await
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        self.writer_mut()?.flush().await
    }

    /// Take ownership of both raw streams for a protocol upgrade
    ///
    /// After this the exchange no longer touches the connection; `close()`
    /// becomes a no-op for the streams.
    pub fn take_streams(&mut self) -> Option<(ExchangeReader, OwnedWriteHalf)> {
        match (self.reader.take(), self.writer.take()) {
            (Some(reader), Some(writer)) => Some((reader, writer)),
            _ => None,
        }
    }

    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    /// Flush and release both streams; idempotent
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush().await;
            let _ = writer.shutdown().await;
        }
        self.reader.take();
    }
}
