//! HTTP/1.1 fetch primitives over a pooled backend connection.
//!
//! # Responsibilities
//! - Serialize the backend request, adding `Host` when the request has none
//! - Read the response head under the first-byte/between-bytes timeouts
//! - Read bodies delimited by length, chunked encoding, or EOF
//!
//! # Design Decisions
//! - A connection that closes or resets before sending a single byte
//!   yields `HeaderFetch::NoData`; the director decides whether to retry
//! - Bytes read past the header block stay buffered on the transport for
//!   the body reader
//! - Bodies are bounded; a declared or received size past the limit fails
//!   the fetch before the buffer grows

use std::io;

use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, HOST};
use http::{HeaderMap, StatusCode, Version};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::fetch::context::{RequestHead, Transport};
use crate::fetch::protocol::{BodyFraming, FetchError, Fetcher, HeaderFetch, ResponseHead};
use crate::resilience::timeouts::within;

/// Upper bound on the response header block.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;
/// Default upper bound on a response body.
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;
const MAX_HEADERS: usize = 100;
const MAX_CHUNK_LINE: usize = 4 * 1024;
const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct Http1Fetcher {
    max_body: usize,
}

impl Default for Http1Fetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Http1Fetcher {
    pub fn new() -> Self {
        Self::with_max_body(DEFAULT_MAX_BODY_BYTES)
    }

    pub fn with_max_body(max_body: usize) -> Self {
        Self { max_body }
    }

    pub fn max_body(&self) -> usize {
        self.max_body
    }
}

#[async_trait]
impl Fetcher for Http1Fetcher {
    async fn fetch_header_block(
        &self,
        bereq: &RequestHead,
        transport: &mut Transport,
        host_header: Option<&str>,
    ) -> HeaderFetch {
        let outcome = match write_request(bereq, transport, host_header).await {
            // A stale socket can surface as a reset on the write side.
            Err(FetchError::Write(e)) if is_disconnect(&e) => HeaderFetch::NoData,
            Err(e) => HeaderFetch::Failed(e),
            Ok(()) => read_head(transport).await,
        };
        if let HeaderFetch::Failed(ref e) = outcome {
            tracing::debug!(
                conn = %transport.conn().id(),
                backend = %transport.backend().key(),
                error = %e,
                "Backend header fetch failed"
            );
        }
        outcome
    }

    async fn fetch_body(&self, transport: &mut Transport, framing: BodyFraming) -> Result<Vec<u8>, FetchError> {
        match framing {
            BodyFraming::None => Ok(Vec::new()),
            BodyFraming::Length(len) => read_length(transport, len, self.max_body).await,
            BodyFraming::Chunked => read_chunked(transport, self.max_body).await,
            BodyFraming::Eof => read_to_eof(transport, self.max_body).await,
        }
    }

    async fn send_request(
        &self,
        bereq: &RequestHead,
        transport: &mut Transport,
        host_header: Option<&str>,
    ) -> Result<(), FetchError> {
        write_request(bereq, transport, host_header).await
    }
}

/// Serialize a request head and body.
pub fn encode_request(bereq: &RequestHead, host_header: Option<&str>, fallback_host: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(256 + bereq.body.len());
    out.extend_from_slice(bereq.method.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(bereq.target.as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");

    let has_body = !bereq.body.is_empty();
    for (name, value) in &bereq.headers {
        if has_body && name == CONTENT_LENGTH {
            continue;
        }
        push_header(&mut out, name.as_str(), value.as_bytes());
    }
    if !bereq.headers.contains_key(HOST) {
        let host = host_header.unwrap_or(fallback_host);
        push_header(&mut out, "host", host.as_bytes());
    }
    if has_body {
        push_header(&mut out, "content-length", bereq.body.len().to_string().as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&bereq.body);
    out
}

fn push_header(out: &mut Vec<u8>, name: &str, value: &[u8]) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value);
    out.extend_from_slice(b"\r\n");
}

async fn write_request(
    bereq: &RequestHead,
    transport: &mut Transport,
    host_header: Option<&str>,
) -> Result<(), FetchError> {
    let peer = transport.conn().peer().to_string();
    let wire = encode_request(bereq, host_header, &peer);
    let limit = transport.between_bytes_timeout();
    let stream = transport.conn_mut().stream_mut();
    let write = async {
        stream.write_all(&wire).await?;
        stream.flush().await
    };
    match within(limit, write).await {
        Some(Ok(())) => Ok(()),
        Some(Err(e)) => Err(FetchError::Write(e)),
        None => Err(FetchError::Write(io::Error::new(
            io::ErrorKind::TimedOut,
            "request write timed out",
        ))),
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

/// Read more bytes into the transport buffer. Returns 0 on EOF.
async fn fill(transport: &mut Transport, first_byte: bool) -> Result<usize, FetchError> {
    let limit = if first_byte {
        transport.first_byte_timeout()
    } else {
        transport.between_bytes_timeout()
    };
    let mut chunk = [0u8; READ_CHUNK];
    match within(limit, transport.conn_mut().stream_mut().read(&mut chunk)).await {
        Some(Ok(n)) => {
            transport.rx_buf().extend_from_slice(&chunk[..n]);
            Ok(n)
        }
        Some(Err(e)) => Err(FetchError::Read(e)),
        None if first_byte => Err(FetchError::FirstByteTimeout(limit)),
        None => Err(FetchError::BetweenBytesTimeout(limit)),
    }
}

async fn read_head(transport: &mut Transport) -> HeaderFetch {
    transport.rx_buf().clear();
    loop {
        let first_byte = transport.rx_buf().is_empty();
        match fill(transport, first_byte).await {
            Ok(0) if first_byte => return HeaderFetch::NoData,
            Ok(0) => return HeaderFetch::Failed(FetchError::Incomplete),
            Ok(_) => {}
            Err(FetchError::Read(e)) if first_byte && is_disconnect(&e) => return HeaderFetch::NoData,
            Err(e) => return HeaderFetch::Failed(e),
        }

        match parse_head(transport.rx_buf()) {
            Ok(Some((head, len))) => {
                transport.rx_buf().drain(..len);
                return HeaderFetch::Received(head);
            }
            Ok(None) if transport.rx_buf().len() > MAX_HEADER_BYTES => {
                return HeaderFetch::Failed(FetchError::HeaderOverflow(MAX_HEADER_BYTES));
            }
            Ok(None) => {}
            Err(e) => return HeaderFetch::Failed(e),
        }
    }
}

/// Parse a complete response head. `Ok(None)` means more bytes are needed.
pub fn parse_head(buf: &[u8]) -> Result<Option<(ResponseHead, usize)>, FetchError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    let len = match response.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(FetchError::Malformed(e.to_string())),
    };

    let version = match response.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };
    let status = response
        .code
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| FetchError::Malformed("invalid status code".into()))?;

    let mut map = HeaderMap::with_capacity(response.headers.len());
    for header in response.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|_| FetchError::Malformed(format!("invalid header name {:?}", header.name)))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|_| FetchError::Malformed(format!("invalid value for header {}", header.name)))?;
        map.append(name, value);
    }

    let head = ResponseHead {
        version,
        status,
        reason: response.reason.unwrap_or_default().to_string(),
        headers: map,
    };
    Ok(Some((head, len)))
}

/// Read exactly `len` bytes, refusing lengths above `limit`.
async fn read_length(transport: &mut Transport, len: u64, limit: usize) -> Result<Vec<u8>, FetchError> {
    let len = match usize::try_from(len) {
        Ok(len) if len <= limit => len,
        _ => return Err(FetchError::BodyOverflow(limit)),
    };
    while transport.rx_buf().len() < len {
        if fill(transport, false).await? == 0 {
            return Err(FetchError::Incomplete);
        }
    }
    Ok(transport.rx_buf().drain(..len).collect())
}

async fn read_to_eof(transport: &mut Transport, limit: usize) -> Result<Vec<u8>, FetchError> {
    loop {
        if transport.rx_buf().len() > limit {
            return Err(FetchError::BodyOverflow(limit));
        }
        if fill(transport, false).await? == 0 {
            return Ok(std::mem::take(transport.rx_buf()));
        }
    }
}

async fn read_line(transport: &mut Transport) -> Result<Vec<u8>, FetchError> {
    loop {
        if let Some(pos) = transport.rx_buf().windows(2).position(|w| w == b"\r\n") {
            let line = transport.rx_buf()[..pos].to_vec();
            transport.rx_buf().drain(..pos + 2);
            return Ok(line);
        }
        if transport.rx_buf().len() > MAX_CHUNK_LINE {
            return Err(FetchError::Malformed("chunk line too long".into()));
        }
        if fill(transport, false).await? == 0 {
            return Err(FetchError::Incomplete);
        }
    }
}

async fn read_chunked(transport: &mut Transport, limit: usize) -> Result<Vec<u8>, FetchError> {
    let mut body = Vec::new();
    loop {
        let line = read_line(transport).await?;
        let size = parse_chunk_size(&line)?;
        if size == 0 {
            // Trailer section ends with an empty line.
            while !read_line(transport).await?.is_empty() {}
            return Ok(body);
        }
        body.extend(read_length(transport, size, limit - body.len()).await?);
        if !read_line(transport).await?.is_empty() {
            return Err(FetchError::Malformed("missing CRLF after chunk".into()));
        }
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, FetchError> {
    let text = std::str::from_utf8(line).map_err(|_| FetchError::Malformed("chunk size not UTF-8".into()))?;
    let digits = text.split(';').next().unwrap_or_default().trim();
    u64::from_str_radix(digits, 16).map_err(|_| FetchError::Malformed(format!("invalid chunk size {digits:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    #[test]
    fn test_encode_adds_host_and_length() {
        let mut req = RequestHead::new(Method::POST, "/submit?x=1");
        req.headers.insert("x-trace", HeaderValue::from_static("abc"));
        req.headers.insert(CONTENT_LENGTH, HeaderValue::from_static("99"));
        req.body = b"hello".to_vec();

        let wire = String::from_utf8(encode_request(&req, Some("example.com"), "10.0.0.1:80")).unwrap();
        assert!(wire.starts_with("POST /submit?x=1 HTTP/1.1\r\n"));
        assert!(wire.contains("x-trace: abc\r\n"));
        assert!(wire.contains("host: example.com\r\n"));
        assert!(wire.contains("content-length: 5\r\n"));
        assert!(!wire.contains("99"));
        assert!(wire.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn test_encode_keeps_request_host() {
        let mut req = RequestHead::new(Method::GET, "/");
        req.headers.insert(HOST, HeaderValue::from_static("client.example"));
        let wire = String::from_utf8(encode_request(&req, Some("override.example"), "10.0.0.1:80")).unwrap();
        assert!(wire.contains("host: client.example\r\n"));
        assert!(!wire.contains("override.example"));

        let bare = RequestHead::new(Method::GET, "/");
        let wire = String::from_utf8(encode_request(&bare, None, "10.0.0.1:80")).unwrap();
        assert!(wire.contains("host: 10.0.0.1:80\r\n"));
    }

    #[test]
    fn test_parse_head() {
        assert!(parse_head(b"HTTP/1.1 200 OK\r\nContent-Le").unwrap().is_none());

        let raw = b"HTTP/1.0 404 Not Found\r\nContent-Length: 3\r\nX-A: 1\r\n\r\nabc";
        let (head, len) = parse_head(raw).unwrap().unwrap();
        assert_eq!(head.version, Version::HTTP_10);
        assert_eq!(head.status, StatusCode::NOT_FOUND);
        assert_eq!(head.reason, "Not Found");
        assert_eq!(head.headers["x-a"], "1");
        assert_eq!(&raw[len..], b"abc");

        assert!(matches!(parse_head(b"garbage\r\n\r\n"), Err(FetchError::Malformed(_))));
    }

    fn transport(stream: tokio::io::DuplexStream) -> Transport {
        use crate::backend::Backend;
        use crate::net::{Connection, TcpPool};
        use crate::resilience::timeouts::Timeouts;
        use std::sync::Arc;
        use std::time::Duration;

        let addr = "127.0.0.1:8080".parse().unwrap();
        let backend = Arc::new(Backend::new("b1", addr, Arc::new(TcpPool::new(addr, Duration::from_secs(1)))));
        backend.take_conn();
        Transport::new(Connection::new(addr, Box::new(stream)), backend, &Timeouts::UNSET)
    }

    #[tokio::test]
    async fn test_body_limit() {
        let fetcher = Http1Fetcher::with_max_body(8);

        let (near, mut far) = tokio::io::duplex(1024);
        let mut t = transport(near);
        far.write_all(b"12345678").await.unwrap();
        assert_eq!(fetcher.fetch_body(&mut t, BodyFraming::Length(8)).await.unwrap(), b"12345678");

        let err = fetcher.fetch_body(&mut t, BodyFraming::Length(9)).await.unwrap_err();
        assert!(matches!(err, FetchError::BodyOverflow(8)));
        assert_eq!(err.close_reason(), crate::fetch::CloseReason::RxOverflow);

        let (near, mut far) = tokio::io::duplex(1024);
        let mut t = transport(near);
        far.write_all(b"5\r\nhello\r\n5\r\nworld\r\n0\r\n\r\n").await.unwrap();
        assert!(matches!(
            fetcher.fetch_body(&mut t, BodyFraming::Chunked).await,
            Err(FetchError::BodyOverflow(8))
        ));

        let (near, mut far) = tokio::io::duplex(1024);
        let mut t = transport(near);
        far.write_all(b"more than eight bytes").await.unwrap();
        drop(far);
        assert!(matches!(
            fetcher.fetch_body(&mut t, BodyFraming::Eof).await,
            Err(FetchError::BodyOverflow(8))
        ));
    }

    #[test]
    fn test_chunk_size() {
        assert_eq!(parse_chunk_size(b"1a").unwrap(), 26);
        assert_eq!(parse_chunk_size(b"0;ext=1").unwrap(), 0);
        assert!(parse_chunk_size(b"zz").is_err());
    }
}
