//! Backend transaction events.
//!
//! Fire-and-forget structured records tied to a transaction id, emitted on a
//! dedicated target so they can be filtered apart from ordinary diagnostics
//! (`RUST_LOG=backend_director::events=debug`).

use crate::fetch::CloseReason;
use crate::net::ConnectionId;

/// Target used for every backend event.
pub const EVENT_TARGET: &str = "backend_director::events";

#[derive(Debug, Clone, Copy)]
pub enum BackendEvent<'a> {
    /// Connection closed instead of recycled.
    Close {
        conn: ConnectionId,
        backend: &'a str,
        reason: CloseReason,
    },
    /// Connection returned to the idle pool.
    Reuse { conn: ConnectionId, backend: &'a str },
    /// A fetch could not proceed.
    FetchError { backend: &'a str, detail: &'a str },
}

impl BackendEvent<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            BackendEvent::Close { .. } => "BackendClose",
            BackendEvent::Reuse { .. } => "BackendReuse",
            BackendEvent::FetchError { .. } => "FetchError",
        }
    }

    /// Record the event on [`EVENT_TARGET`]; its name is the `event` field.
    pub fn emit(&self, xid: u64) {
        let event = self.name();
        match *self {
            BackendEvent::Close {
                conn,
                backend,
                reason,
            } => {
                tracing::debug!(target: EVENT_TARGET, event, xid, conn = %conn, backend, reason = %reason, "Backend connection closed");
            }
            BackendEvent::Reuse { conn, backend } => {
                tracing::debug!(target: EVENT_TARGET, event, xid, conn = %conn, backend, "Backend connection recycled");
            }
            BackendEvent::FetchError { backend, detail } => {
                tracing::warn!(target: EVENT_TARGET, event, xid, backend, detail, "Backend fetch failed");
            }
        }
    }
}
