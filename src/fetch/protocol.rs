//! Fetch primitives shared by every wire protocol.
//!
//! The director never parses responses itself. It hands a transport to a
//! `Fetcher` and acts on the typed outcome.

use std::fmt::Debug;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use http::header::{CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, Method, StatusCode, Version};
use thiserror::Error;

use crate::fetch::context::{CloseReason, RequestHead, Transport};

/// Parsed backend response head.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub version: Version,
    pub status: StatusCode,
    pub reason: String,
    pub headers: HeaderMap,
}

/// How the response body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    None,
    Length(u64),
    Chunked,
    /// Read until the backend closes.
    Eof,
}

impl ResponseHead {
    /// Close reason if the backend announced it will not keep the
    /// connection alive.
    pub fn must_close(&self) -> Option<CloseReason> {
        let token = |t: &str| header_has_token(&self.headers, CONNECTION, t);
        if token("close") {
            Some(CloseReason::RespClose)
        } else if self.version == Version::HTTP_10 && !token("keep-alive") {
            Some(CloseReason::RespHttp10)
        } else {
            None
        }
    }

    /// Body framing for a response to `method`.
    pub fn framing(&self, method: &Method) -> Result<BodyFraming, FetchError> {
        if *method == Method::HEAD
            || self.status.is_informational()
            || self.status == StatusCode::NO_CONTENT
            || self.status == StatusCode::NOT_MODIFIED
        {
            return Ok(BodyFraming::None);
        }
        if header_has_token(&self.headers, TRANSFER_ENCODING, "chunked") {
            return Ok(BodyFraming::Chunked);
        }
        match self.headers.get(CONTENT_LENGTH) {
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(BodyFraming::Length)
                .ok_or_else(|| FetchError::Malformed("invalid Content-Length".into())),
            None => Ok(BodyFraming::Eof),
        }
    }
}

fn header_has_token(headers: &HeaderMap, name: http::header::HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// Errors from the fetch primitives.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("write to backend failed: {0}")]
    Write(#[source] io::Error),

    #[error("read from backend failed: {0}")]
    Read(#[source] io::Error),

    #[error("first byte timeout after {0:?}")]
    FirstByteTimeout(Duration),

    #[error("between bytes timeout after {0:?}")]
    BetweenBytesTimeout(Duration),

    #[error("response header exceeds {0} bytes")]
    HeaderOverflow(usize),

    #[error("response body exceeds {0} bytes")]
    BodyOverflow(usize),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("backend closed mid-response")]
    Incomplete,

    #[error("backend closed the connection without a response")]
    NoResponse,
}

impl FetchError {
    /// How the connection must be retired after this error.
    pub fn close_reason(&self) -> CloseReason {
        match self {
            FetchError::Write(_) => CloseReason::TxError,
            FetchError::Read(_) => CloseReason::RxBody,
            FetchError::FirstByteTimeout(_) | FetchError::BetweenBytesTimeout(_) => CloseReason::RxTimeout,
            FetchError::HeaderOverflow(_) | FetchError::BodyOverflow(_) => CloseReason::RxOverflow,
            FetchError::Malformed(_) => CloseReason::RxBad,
            FetchError::Incomplete | FetchError::NoResponse => CloseReason::RemClose,
        }
    }
}

/// Outcome of sending a request and reading the response head.
#[derive(Debug)]
pub enum HeaderFetch {
    Received(ResponseHead),
    /// Connection looked usable but yielded no bytes at all. Retryable
    /// once when the connection was recycled.
    NoData,
    Failed(FetchError),
}

/// Wire protocol used by a director on an acquired transport.
#[async_trait]
pub trait Fetcher: Send + Sync + Debug {
    /// Write the request and read the response head.
    async fn fetch_header_block(
        &self,
        bereq: &RequestHead,
        transport: &mut Transport,
        host_header: Option<&str>,
    ) -> HeaderFetch;

    /// Read the response body delimited by `framing`.
    async fn fetch_body(&self, transport: &mut Transport, framing: BodyFraming) -> Result<Vec<u8>, FetchError>;

    /// Write the request head and body only. Used by pipe mode.
    async fn send_request(
        &self,
        bereq: &RequestHead,
        transport: &mut Transport,
        host_header: Option<&str>,
    ) -> Result<(), FetchError>;
}
