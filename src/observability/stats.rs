//! Director statistics.
//!
//! Every counter is kept twice: an atomic copy read by the status report and
//! tests, and a `metrics` counter picked up by the Prometheus exporter.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use serde::Serialize;

/// Process-wide backend counters.
#[derive(Debug, Default)]
pub struct MainStats {
    backend_unhealthy: AtomicU64,
    backend_busy: AtomicU64,
    backend_fail: AtomicU64,
    backend_retry: AtomicU64,
    backend_recycle: AtomicU64,
}

/// Point-in-time copy of [`MainStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MainStatsSnapshot {
    pub backend_unhealthy: u64,
    pub backend_busy: u64,
    pub backend_fail: u64,
    pub backend_retry: u64,
    pub backend_recycle: u64,
}

impl MainStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquisition refused because the backend is sick.
    pub fn inc_unhealthy(&self) {
        self.backend_unhealthy.fetch_add(1, Ordering::Relaxed);
        counter!("backend_unhealthy").increment(1);
    }

    /// Acquisition refused because max_connections was reached.
    pub fn inc_busy(&self) {
        self.backend_busy.fetch_add(1, Ordering::Relaxed);
        counter!("backend_busy").increment(1);
    }

    /// The pool could not produce a connection.
    pub fn inc_fail(&self) {
        self.backend_fail.fetch_add(1, Ordering::Relaxed);
        counter!("backend_fail").increment(1);
    }

    /// A stale recycled connection was retried.
    pub fn inc_retry(&self) {
        self.backend_retry.fetch_add(1, Ordering::Relaxed);
        counter!("backend_retry").increment(1);
    }

    /// A connection went back to the idle pool.
    pub fn inc_recycle(&self) {
        self.backend_recycle.fetch_add(1, Ordering::Relaxed);
        counter!("backend_recycle").increment(1);
    }

    pub fn snapshot(&self) -> MainStatsSnapshot {
        MainStatsSnapshot {
            backend_unhealthy: self.backend_unhealthy.load(Ordering::Relaxed),
            backend_busy: self.backend_busy.load(Ordering::Relaxed),
            backend_fail: self.backend_fail.load(Ordering::Relaxed),
            backend_retry: self.backend_retry.load(Ordering::Relaxed),
            backend_recycle: self.backend_recycle.load(Ordering::Relaxed),
        }
    }
}

/// Per-backend counters, labelled with the backend name when exported.
#[derive(Debug)]
pub struct BackendStats {
    name: String,
    conn: AtomicU64,
    req: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackendStatsSnapshot {
    pub conn: u64,
    pub req: u64,
}

impl BackendStats {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            conn: AtomicU64::new(0),
            req: AtomicU64::new(0),
        }
    }

    /// Connection handed out. Called with the backend lock held.
    pub fn inc_conn(&self) {
        self.conn.fetch_add(1, Ordering::Relaxed);
        counter!("backend_conn", "backend" => self.name.clone()).increment(1);
    }

    /// Request sent over a handed-out connection.
    pub fn inc_req(&self) {
        self.req.fetch_add(1, Ordering::Relaxed);
        counter!("backend_req", "backend" => self.name.clone()).increment(1);
    }

    pub fn snapshot(&self) -> BackendStatsSnapshot {
        BackendStatsSnapshot {
            conn: self.conn.load(Ordering::Relaxed),
            req: self.req.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_stats_snapshot() {
        let stats = MainStats::new();
        stats.inc_retry();
        stats.inc_retry();
        stats.inc_busy();

        let snap = stats.snapshot();
        assert_eq!(snap.backend_retry, 2);
        assert_eq!(snap.backend_busy, 1);
        assert_eq!(snap.backend_fail, 0);
    }

    #[test]
    fn test_backend_stats() {
        let stats = BackendStats::new("b1");
        stats.inc_conn();
        stats.inc_req();
        stats.inc_req();
        assert_eq!(stats.snapshot(), BackendStatsSnapshot { conn: 1, req: 2 });
    }
}
