//! Request context for one backend fetch.
//!
//! # Responsibilities
//! - Carry the backend request and its request-scoped timeout overrides
//! - Hold the attached transport between acquisition and release
//! - Record whether the connection must be closed instead of recycled
//!
//! # Design Decisions
//! - The transport is attached only by director acquisition and detached
//!   only by director release
//! - The backend reference inside a transport is a lease: dropping an
//!   unreleased transport still returns the counters
//! - A transport whose last response was not fully read is never recycled

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, Method};

use crate::backend::{Backend, BackendCounters};
use crate::fetch::protocol::ResponseHead;
use crate::net::connection::Connection;
use crate::resilience::timeouts::Timeouts;

static XID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Why a backend connection is closed rather than recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed, or the response was delimited by EOF.
    RemClose,
    /// Response carried `Connection: close`.
    RespClose,
    /// HTTP/1.0 response without keep-alive.
    RespHttp10,
    /// Response could not be parsed.
    RxBad,
    /// Body read failed.
    RxBody,
    /// Response header block or body too large.
    RxOverflow,
    /// First-byte or between-bytes timeout.
    RxTimeout,
    /// Request could not be written.
    TxError,
    /// Connection was used in pipe mode.
    TxPipe,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::RemClose => "rem_close",
            CloseReason::RespClose => "resp_close",
            CloseReason::RespHttp10 => "resp_http10",
            CloseReason::RxBad => "rx_bad",
            CloseReason::RxBody => "rx_body",
            CloseReason::RxOverflow => "rx_overflow",
            CloseReason::RxTimeout => "rx_timeout",
            CloseReason::TxError => "tx_error",
            CloseReason::TxPipe => "tx_pipe",
        };
        f.write_str(s)
    }
}

/// Backend request as it will be written on the wire.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    /// Path and query.
    pub target: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl RequestHead {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }
}

/// Reference a handed-out connection holds on its backend.
pub(crate) struct BackendLease {
    backend: Arc<Backend>,
    settled: bool,
}

impl BackendLease {
    pub(crate) fn new(backend: Arc<Backend>) -> Self {
        Self {
            backend,
            settled: false,
        }
    }

    pub(crate) fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    /// Drop the connection reference, taking the backend lock.
    pub(crate) fn settle(mut self) -> usize {
        self.settled = true;
        self.backend.drop_conn()
    }

    /// Drop the connection reference; the caller already holds the lock.
    pub(crate) fn settle_locked(mut self, counters: &mut BackendCounters) -> usize {
        self.settled = true;
        counters.drop_conn()
    }
}

impl Drop for BackendLease {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!(backend = %self.backend.key(), "Backend connection dropped without release");
            self.backend.drop_conn();
        }
    }
}

/// An acquired connection plus the timeouts resolved for it.
pub struct Transport {
    conn: Connection,
    lease: BackendLease,
    first_byte_timeout: Duration,
    between_bytes_timeout: Duration,
    rx: Vec<u8>,
    body_pending: bool,
}

impl Transport {
    pub(crate) fn new(conn: Connection, backend: Arc<Backend>, timeouts: &Timeouts) -> Self {
        Self {
            conn,
            lease: BackendLease::new(backend),
            first_byte_timeout: timeouts.first_byte,
            between_bytes_timeout: timeouts.between_bytes,
            rx: Vec::new(),
            body_pending: false,
        }
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn is_recycled(&self) -> bool {
        self.conn.is_recycled()
    }

    pub fn backend(&self) -> &Arc<Backend> {
        self.lease.backend()
    }

    pub fn first_byte_timeout(&self) -> Duration {
        self.first_byte_timeout
    }

    pub fn between_bytes_timeout(&self) -> Duration {
        self.between_bytes_timeout
    }

    /// Bytes received but not yet consumed.
    pub fn rx_buf(&mut self) -> &mut Vec<u8> {
        &mut self.rx
    }

    /// Mark whether a response body is still owed on the wire.
    pub(crate) fn set_body_pending(&mut self, pending: bool) {
        self.body_pending = pending;
    }

    /// True when bytes of the last response may still be unread, in the
    /// buffer or on the socket.
    pub fn has_unread(&self) -> bool {
        self.body_pending || !self.rx.is_empty()
    }

    pub(crate) fn into_parts(self) -> (Connection, BackendLease) {
        (self.conn, self.lease)
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("conn", &self.conn)
            .field("backend", &self.lease.backend().key())
            .field("first_byte_timeout", &self.first_byte_timeout)
            .field("between_bytes_timeout", &self.between_bytes_timeout)
            .field("buffered", &self.rx.len())
            .field("body_pending", &self.body_pending)
            .finish()
    }
}

/// The in-flight unit of work a director operates on.
#[derive(Debug)]
pub struct FetchContext {
    xid: u64,
    /// Request sent to the backend.
    pub bereq: RequestHead,
    /// Request-scoped timeout overrides, zero = unset.
    pub timeouts: Timeouts,
    /// Close the connection on release instead of recycling it.
    pub do_close: Option<CloseReason>,
    /// Response head, once fetched.
    pub beresp: Option<ResponseHead>,
    pub(crate) htc: Option<Transport>,
}

impl FetchContext {
    pub fn new(bereq: RequestHead) -> Self {
        Self {
            xid: XID_COUNTER.fetch_add(1, Ordering::Relaxed),
            bereq,
            timeouts: Timeouts::UNSET,
            do_close: None,
            beresp: None,
            htc: None,
        }
    }

    /// `GET target` with no headers.
    pub fn get(target: impl Into<String>) -> Self {
        Self::new(RequestHead::new(Method::GET, target))
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Transaction id carried by every event of this fetch.
    pub fn xid(&self) -> u64 {
        self.xid
    }

    pub fn is_connected(&self) -> bool {
        self.htc.is_some()
    }

    pub fn transport(&self) -> Option<&Transport> {
        self.htc.as_ref()
    }

    pub fn transport_mut(&mut self) -> Option<&mut Transport> {
        self.htc.as_mut()
    }

    /// Mark the connection as not reusable.
    pub fn close(&mut self, reason: CloseReason) {
        self.do_close = Some(reason);
    }
}
