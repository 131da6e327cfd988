//! Backend connection handle.
//!
//! # Responsibilities
//! - Generate unique connection IDs for events and tracing
//! - Carry the byte stream, peer address and the "recycled" flag
//!
//! # Design Decisions
//! - A `Connection` is moved, never shared: the pool owns it while idle,
//!   exactly one request owns it while in use
//! - The stream is type-erased so pools can hand out TCP sockets or, in
//!   tests, in-memory duplex pipes

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncWrite};

/// Global atomic counter for connection IDs.
/// Relaxed ordering is sufficient since only uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a backend connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bconn-{}", self.0)
    }
}

/// Byte stream a backend connection runs over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Sync + Unpin {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Sync + Unpin {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// A pooled transport handle to one backend.
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    recycled: bool,
    stream: BoxedStream,
}

impl Connection {
    /// Wrap a freshly dialed stream.
    pub fn new(peer: SocketAddr, stream: BoxedStream) -> Self {
        Self {
            id: ConnectionId::new(),
            peer,
            recycled: false,
            stream,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// True when the pool handed out an idle connection instead of dialing.
    pub fn is_recycled(&self) -> bool {
        self.recycled
    }

    /// Set by pools when an idle connection is handed out again.
    pub fn set_recycled(&mut self, recycled: bool) {
        self.recycled = recycled;
    }

    pub fn stream_mut(&mut self) -> &mut BoxedStream {
        &mut self.stream
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("recycled", &self.recycled)
            .finish_non_exhaustive()
    }
}
