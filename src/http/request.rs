//! HTTP request-head parsing
//!
//! An explicit two-state machine (request line, then headers) fed one
//! decoded line at a time. The pure [`HeadParser`] is testable without
//! sockets; [`read_head`] drives it from an async buffered reader, reading
//! byte-by-byte until line feed and skipping control bytes the way a lenient
//! line reader does.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::{Error, HttpError};
use crate::http::headers::Headers;

/// Request target split into path and optional query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    raw: String,
    path: String,
    query: Option<String>,
}

impl RequestTarget {
    pub fn parse(raw: &str) -> Self {
        let (path, query) = match raw.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (raw.to_string(), None),
        };
        Self {
            raw: raw.to_string(),
            path,
            query,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }
}

impl std::fmt::Display for RequestTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parsed request line and headers
#[derive(Debug)]
pub struct RequestHead {
    pub method: String,
    pub target: RequestTarget,
    pub version: String,
    pub headers: Headers,
}

#[derive(Debug, PartialEq, Eq)]
enum ParseState {
    RequestLine,
    Headers,
    Done,
}

/// Incremental request-head parser
#[derive(Debug)]
pub struct HeadParser {
    state: ParseState,
    method: String,
    target: Option<RequestTarget>,
    version: String,
    headers: Headers,
}

impl HeadParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::RequestLine,
            method: String::new(),
            target: None,
            version: String::new(),
            headers: Headers::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == ParseState::Done
    }

    /// Feed one decoded line (without terminator); returns `true` once the
    /// head is complete
    pub fn feed_line(&mut self, line: &str) -> Result<bool, HttpError> {
        match self.state {
            ParseState::RequestLine => {
                let mut parts = line.split_whitespace();
                let method = parts.next();
                let target = parts.next();
                let version = parts.next();
                match (method, target, version) {
                    (Some(method), Some(target), Some(version)) => {
                        let version = version.to_ascii_uppercase();
                        if !version.starts_with("HTTP/") {
                            return Err(HttpError::NotHttp(version));
                        }
                        self.method = method.to_ascii_uppercase();
                        self.target = Some(RequestTarget::parse(target));
                        self.version = version;
                        self.state = ParseState::Headers;
                        Ok(false)
                    }
                    _ => Err(HttpError::BadRequestLine(line.to_string())),
                }
            }
            ParseState::Headers => {
                if line.is_empty() {
                    self.state = ParseState::Done;
                    Ok(true)
                } else {
                    self.headers.add_line(line);
                    Ok(false)
                }
            }
            ParseState::Done => Ok(true),
        }
    }

    /// Consume the parser once `feed_line` reported completion
    pub fn into_head(self) -> Option<RequestHead> {
        if self.state != ParseState::Done {
            return None;
        }
        Some(RequestHead {
            method: self.method,
            target: self.target?,
            version: self.version,
            headers: self.headers,
        })
    }
}

impl Default for HeadParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Read one line up to LF, dropping CR and other control bytes
async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, Error> {
    let mut raw = Vec::new();
    let read = reader.read_until(b'\n', &mut raw).await?;
    if read == 0 {
        return Err(HttpError::UnexpectedEof.into());
    }
    Ok(raw
        .iter()
        .filter(|b| !b.is_ascii_control())
        .map(|&b| b as char)
        .collect())
}

/// Read and parse a complete request head from the connection
pub async fn read_head<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<RequestHead, Error> {
    let mut parser = HeadParser::new();
    loop {
        let line = read_line(reader).await?;
        if parser.feed_line(&line)? {
            // into_head cannot fail after feed_line reported completion
            return parser
                .into_head()
                .ok_or_else(|| HttpError::UnexpectedEof.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(lines: &[&str]) -> Result<RequestHead, HttpError> {
        let mut parser = HeadParser::new();
        for line in lines {
            if parser.feed_line(line)? {
                break;
            }
        }
        Ok(parser.into_head().expect("head incomplete"))
    }

    #[test]
    fn test_request_line_and_headers() {
        let head = parse(&[
            "GET /stream.ts?session=1 HTTP/1.1",
            "Host: localhost:8080",
            "Connection: keep-alive",
            "",
        ])
        .unwrap();

        assert_eq!(head.method, "GET");
        assert_eq!(head.target.path(), "/stream.ts");
        assert_eq!(head.target.query(), Some("session=1"));
        assert_eq!(head.version, "HTTP/1.1");
        assert_eq!(head.headers.get_first("host"), Some("localhost:8080"));
    }

    #[test]
    fn test_method_uppercased() {
        let head = parse(&["get / http/1.1", ""]).unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.version, "HTTP/1.1");
    }

    #[test]
    fn test_rejects_short_request_line() {
        let mut parser = HeadParser::new();
        let err = parser.feed_line("GET /").unwrap_err();
        assert!(matches!(err, HttpError::BadRequestLine(_)));
    }

    #[test]
    fn test_rejects_non_http_version() {
        let mut parser = HeadParser::new();
        let err = parser.feed_line("GET / SPDY/3").unwrap_err();
        assert!(matches!(err, HttpError::NotHttp(_)));
    }

    #[tokio::test]
    async fn test_read_head_from_stream() {
        let raw = b"GET /wsstream.ts HTTP/1.1\r\nUpgrade: websocket\r\n\r\n";
        let mut reader = tokio::io::BufReader::new(&raw[..]);
        let head = read_head(&mut reader).await.unwrap();

        assert_eq!(head.method, "GET");
        assert_eq!(head.headers.get_first("upgrade"), Some("websocket"));
    }

    #[tokio::test]
    async fn test_read_head_eof_is_error() {
        let raw = b"GET / HTTP/1.1\r\nHost: x";
        let mut reader = tokio::io::BufReader::new(&raw[..]);
        assert!(read_head(&mut reader).await.is_err());
    }
}
