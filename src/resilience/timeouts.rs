//! Timeout resolution and enforcement.
//!
//! # Responsibilities
//! - Pick the effective connect / first-byte / between-bytes timeout from
//!   the request → backend → global default chain
//! - Wrap backend I/O with the resolved deadline
//!
//! # Design Decisions
//! - `Duration::ZERO` means "unset" at every level of the chain
//! - A resolved zero means "no deadline" when applied to I/O
//! - Uses Tokio's timeout facilities

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The three timeout classes a backend fetch is subject to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Timeouts {
    /// Time allowed for the pool to produce a connection.
    pub connect: Duration,
    /// Time allowed until the first response byte arrives.
    pub first_byte: Duration,
    /// Time allowed between two consecutive reads.
    pub between_bytes: Duration,
}

impl Timeouts {
    /// All classes unset.
    pub const UNSET: Timeouts = Timeouts {
        connect: Duration::ZERO,
        first_byte: Duration::ZERO,
        between_bytes: Duration::ZERO,
    };

    pub fn new(connect: Duration, first_byte: Duration, between_bytes: Duration) -> Self {
        Self {
            connect,
            first_byte,
            between_bytes,
        }
    }

    /// Build from millisecond values, 0 meaning unset.
    pub fn from_millis(connect_ms: u64, first_byte_ms: u64, between_bytes_ms: u64) -> Self {
        Self::new(
            Duration::from_millis(connect_ms),
            Duration::from_millis(first_byte_ms),
            Duration::from_millis(between_bytes_ms),
        )
    }
}

/// Return the first value of the chain that is not zero.
pub fn pick(request: Duration, backend: Duration, default: Duration) -> Duration {
    [request, backend]
        .into_iter()
        .find(|d| !d.is_zero())
        .unwrap_or(default)
}

/// Resolve every timeout class independently.
pub fn resolve(request: &Timeouts, backend: &Timeouts, defaults: &Timeouts) -> Timeouts {
    Timeouts {
        connect: pick(request.connect, backend.connect, defaults.connect),
        first_byte: pick(request.first_byte, backend.first_byte, defaults.first_byte),
        between_bytes: pick(
            request.between_bytes,
            backend.between_bytes,
            defaults.between_bytes,
        ),
    }
}

/// Await `fut` for at most `limit`. Returns `None` when the deadline passed.
/// A zero limit waits without deadline.
pub async fn within<F: Future>(limit: Duration, fut: F) -> Option<F::Output> {
    if limit.is_zero() {
        return Some(fut.await);
    }
    tokio::time::timeout(limit, fut).await.ok()
}
