//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single origin server endpoint
//! - Track live connections and references under one lock
//! - Hold health state (administrative override + probe flag)
//! - Own the backend's dedicated connection pool
//!
//! # Design Decisions
//! - Shared through `Arc`; the explicit `refcount` decides when the
//!   registry may reclaim it
//! - `refcount` and `n_conn` only ever change together under the mutex
//! - Health fields are relaxed atomics: no lock on the hot read path

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::health::state::{verdict, AdminHealth};
use crate::net::pool::ConnectionPool;
use crate::observability::metrics;
use crate::observability::stats::{BackendStats, BackendStatsSnapshot};

pub mod registry;

pub use registry::BackendRegistry;

/// Identity of a backend in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendKey {
    pub name: String,
    pub addr: SocketAddr,
}

impl fmt::Display for BackendKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.addr)
    }
}

/// Counters guarded by the backend mutex.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackendCounters {
    /// Director bindings plus handed-out connections.
    pub refcount: usize,
    /// Live connections handed out.
    pub n_conn: usize,
}

impl BackendCounters {
    /// Drop the reference held by a connection. Caller holds the lock.
    /// Returns the remaining reference count.
    pub fn drop_conn(&mut self) -> usize {
        debug_assert!(self.refcount > 0 && self.n_conn > 0);
        self.refcount = self.refcount.saturating_sub(1);
        self.n_conn = self.n_conn.saturating_sub(1);
        self.refcount
    }
}

/// A single origin server.
pub struct Backend {
    key: BackendKey,
    admin_health: AtomicU8,
    probe_healthy: AtomicBool,
    /// Milliseconds since the epoch of the last verdict flip.
    health_changed: AtomicU64,
    counters: Mutex<BackendCounters>,
    pool: Arc<dyn ConnectionPool>,
    stats: BackendStats,
}

impl Backend {
    /// Create a backend with no references. Probe state starts healthy.
    pub fn new(name: impl Into<String>, addr: SocketAddr, pool: Arc<dyn ConnectionPool>) -> Self {
        let name = name.into();
        Self {
            stats: BackendStats::new(name.clone()),
            key: BackendKey { name, addr },
            admin_health: AtomicU8::new(AdminHealth::Probe as u8),
            probe_healthy: AtomicBool::new(true),
            health_changed: AtomicU64::new(now_millis()),
            counters: Mutex::new(BackendCounters::default()),
            pool,
        }
    }

    pub fn key(&self) -> &BackendKey {
        &self.key
    }

    pub fn display_name(&self) -> &str {
        &self.key.name
    }

    pub fn addr(&self) -> SocketAddr {
        self.key.addr
    }

    pub fn pool(&self) -> &Arc<dyn ConnectionPool> {
        &self.pool
    }

    pub fn stats(&self) -> &BackendStats {
        &self.stats
    }

    // --- Counters ---

    /// Lock the counters. The guard must not be held across an await.
    pub fn lock(&self) -> MutexGuard<'_, BackendCounters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn counters(&self) -> BackendCounters {
        *self.lock()
    }

    pub fn n_conn(&self) -> usize {
        self.lock().n_conn
    }

    pub fn refcount(&self) -> usize {
        self.lock().refcount
    }

    /// Reference taken by a director binding.
    pub(crate) fn bind(&self) -> usize {
        let mut counters = self.lock();
        counters.refcount += 1;
        counters.refcount
    }

    /// Release a director binding. Returns the remaining reference count.
    pub(crate) fn unbind(&self) -> usize {
        let mut counters = self.lock();
        debug_assert!(counters.refcount > 0);
        counters.refcount = counters.refcount.saturating_sub(1);
        counters.refcount
    }

    /// Account for a handed-out connection.
    pub(crate) fn take_conn(&self) {
        let n_conn = {
            let mut counters = self.lock();
            counters.refcount += 1;
            counters.n_conn += 1;
            self.stats.inc_conn();
            counters.n_conn
        };
        metrics::record_backend_connections(self.display_name(), n_conn);
    }

    /// Release a connection's reference, taking the lock.
    pub(crate) fn drop_conn(&self) -> usize {
        let (refcount, n_conn) = {
            let mut counters = self.lock();
            (counters.drop_conn(), counters.n_conn)
        };
        metrics::record_backend_connections(self.display_name(), n_conn);
        refcount
    }

    // --- Health ---

    /// Current verdict and the time it last flipped.
    pub fn healthy(&self) -> (bool, SystemTime) {
        let changed = UNIX_EPOCH + Duration::from_millis(self.health_changed.load(Ordering::Relaxed));
        (self.is_healthy(), changed)
    }

    pub fn is_healthy(&self) -> bool {
        verdict(self.admin_health(), self.probe_healthy.load(Ordering::Relaxed))
    }

    pub fn admin_health(&self) -> AdminHealth {
        AdminHealth::from(self.admin_health.load(Ordering::Relaxed))
    }

    pub fn probe_healthy(&self) -> bool {
        self.probe_healthy.load(Ordering::Relaxed)
    }

    /// Change the administrative override.
    pub fn set_admin_health(&self, health: AdminHealth) {
        self.update_health(|| self.admin_health.store(health as u8, Ordering::Relaxed));
    }

    /// Written by the probe subsystem.
    pub fn set_probe_health(&self, healthy: bool) {
        self.update_health(|| self.probe_healthy.store(healthy, Ordering::Relaxed));
    }

    fn update_health(&self, store: impl FnOnce()) {
        let before = self.is_healthy();
        store();
        let after = self.is_healthy();
        if before != after {
            self.health_changed.store(now_millis(), Ordering::Relaxed);
            metrics::record_backend_health(self.display_name(), after);
            tracing::info!(backend = %self.key, healthy = after, "Backend health changed");
        }
    }

    pub fn status(&self) -> BackendStatus {
        let counters = self.counters();
        BackendStatus {
            name: self.key.name.clone(),
            address: self.key.addr.to_string(),
            admin_health: self.admin_health(),
            probe_healthy: self.probe_healthy(),
            healthy: self.is_healthy(),
            refcount: counters.refcount,
            n_conn: counters.n_conn,
            idle: self.pool.idle_count(),
            stats: self.stats.snapshot(),
        }
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("key", &self.key)
            .field("admin_health", &self.admin_health())
            .field("probe_healthy", &self.probe_healthy())
            .field("counters", &self.counters())
            .finish_non_exhaustive()
    }
}

/// Serializable view of a backend, for status reports.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub name: String,
    pub address: String,
    pub admin_health: AdminHealth,
    pub probe_healthy: bool,
    pub healthy: bool,
    pub refcount: usize,
    pub n_conn: usize,
    pub idle: usize,
    pub stats: BackendStatsSnapshot,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
