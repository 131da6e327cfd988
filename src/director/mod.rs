//! Director subsystem.
//!
//! # Data Flow
//! ```text
//! FetchContext
//!     → Director::get_connection
//!         health check → capacity check → pool.obtain → counters++
//!     → Director::fetch_headers
//!         fetcher.fetch_header_block
//!         NoData on a recycled connection → close, retry once
//!     → Director::fetch_body
//!     → Director::finish
//!         close flag ? pool.close : pool.recycle → counters--
//! ```
//!
//! # Design Decisions
//! - Collaborators (pool, fetcher, probe) are trait objects so tests can
//!   script them
//! - The only retry is the stale-connection retry, and it happens at most
//!   once per fetch
//! - `max_connections` is a soft limit: the count is checked before the
//!   pool call and incremented after it

use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::Serialize;

use crate::fetch::{FetchContext, Fetcher, Http1Fetcher};
use crate::health::{ActiveProber, HealthProbe};
use crate::net::{AsyncStream, PoolFactory, TcpPoolFactory};
use crate::observability::MainStats;
use crate::resilience::timeouts::Timeouts;

pub mod backend;
pub mod error;

pub use backend::BackendDirector;
pub use error::DirectorError;

/// Byte counts of a finished pipe session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipeTotals {
    pub to_backend: u64,
    pub to_client: u64,
}

/// Request-path contract of a director.
#[async_trait]
pub trait Director: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Attach a backend connection to `ctx`.
    async fn get_connection(&self, ctx: &mut FetchContext) -> Result<(), DirectorError>;

    /// Send the request and read the response head into `ctx.beresp`.
    /// The connection stays attached on success.
    async fn fetch_headers(&self, ctx: &mut FetchContext) -> Result<(), DirectorError>;

    /// Read the response body over the attached connection.
    async fn fetch_body(&self, ctx: &mut FetchContext) -> Result<Vec<u8>, DirectorError>;

    /// Release the attached connection, if any.
    fn finish(&self, ctx: &mut FetchContext);

    fn healthy(&self, ctx: Option<&FetchContext>) -> (bool, SystemTime);

    /// Forward the request, then shuttle bytes both ways until either side
    /// closes. The backend connection is never reused.
    async fn pipe(&self, ctx: &mut FetchContext, client: &mut dyn AsyncStream) -> Result<PipeTotals, DirectorError>;
}

/// Collaborators and process-wide state shared by every director.
#[derive(Debug, Clone)]
pub struct Services {
    pub pools: Arc<dyn PoolFactory>,
    pub fetcher: Arc<dyn Fetcher>,
    pub probes: Arc<dyn HealthProbe>,
    pub stats: Arc<MainStats>,
    /// Global timeout defaults, the last level of the resolution chain.
    pub defaults: Timeouts,
}

impl Services {
    /// TCP pools, HTTP/1.1 fetcher and active probing.
    pub fn standard(defaults: Timeouts, idle_timeout: Duration) -> Self {
        Self {
            pools: Arc::new(TcpPoolFactory::new(idle_timeout)),
            fetcher: Arc::new(Http1Fetcher::new()),
            probes: Arc::new(ActiveProber::new()),
            stats: Arc::new(MainStats::new()),
            defaults,
        }
    }

    pub fn with_pools(mut self, pools: Arc<dyn PoolFactory>) -> Self {
        self.pools = pools;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_probes(mut self, probes: Arc<dyn HealthProbe>) -> Self {
        self.probes = probes;
        self
    }
}
