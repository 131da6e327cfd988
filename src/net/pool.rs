//! Backend connection pooling.
//!
//! # Responsibilities
//! - Produce a connection to one backend: an idle one if available,
//!   otherwise a freshly dialed one within the connect timeout
//! - Park recycled connections and reap those idle for too long
//! - Close connections that must not be reused
//!
//! # Design Decisions
//! - One pool per backend, created through a `PoolFactory`
//! - No liveness check on hand-out: a peer may have closed an idle socket,
//!   the director's stale-connection retry covers that race
//! - The idle queue lock is never held across an await

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::TcpStream;

use crate::net::connection::Connection;
use crate::resilience::timeouts;

/// Errors a pool reports when it cannot produce a connection.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Dial did not complete within the connect timeout.
    #[error("connect to {addr} timed out after {timeout:?}")]
    Timeout { addr: SocketAddr, timeout: Duration },

    /// Dial failed.
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Pool refuses to hand out connections.
    #[error("pool for {addr} is closed")]
    Closed { addr: SocketAddr },
}

/// Contract of the connection pool, as consumed by the director.
#[async_trait]
pub trait ConnectionPool: Send + Sync + std::fmt::Debug {
    /// Hand out an idle connection (flagged recycled) or dial a new one.
    async fn obtain(&self, timeout: Duration) -> Result<Connection, PoolError>;

    /// Take a connection back as idle, keeping the socket open.
    fn recycle(&self, conn: Connection);

    /// Close a connection.
    fn close(&self, conn: Connection);

    /// Number of idle connections currently parked.
    fn idle_count(&self) -> usize {
        0
    }
}

/// Creates the dedicated pool of a new backend.
pub trait PoolFactory: Send + Sync + std::fmt::Debug {
    fn create(&self, name: &str, addr: SocketAddr) -> Arc<dyn ConnectionPool>;
}

#[derive(Debug)]
struct IdleConnection {
    conn: Connection,
    since: Instant,
}

/// Tokio TCP pool for one backend address.
#[derive(Debug)]
pub struct TcpPool {
    addr: SocketAddr,
    idle_timeout: Duration,
    idle: Mutex<VecDeque<IdleConnection>>,
}

impl TcpPool {
    pub fn new(addr: SocketAddr, idle_timeout: Duration) -> Self {
        Self {
            addr,
            idle_timeout,
            idle: Mutex::new(VecDeque::new()),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn idle(&self) -> MutexGuard<'_, VecDeque<IdleConnection>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop idle connections older than the idle timeout.
    /// Returns how many were closed.
    pub fn reap_idle(&self) -> usize {
        let mut idle = self.idle();
        let before = idle.len();
        let idle_timeout = self.idle_timeout;
        idle.retain(|entry| entry.since.elapsed() < idle_timeout);
        let reaped = before - idle.len();
        if reaped > 0 {
            tracing::debug!(addr = %self.addr, reaped, "Reaped idle backend connections");
        }
        reaped
    }

    /// Most recently parked connection first, so the warmest socket is reused.
    fn pop_idle(&self) -> Option<Connection> {
        let mut idle = self.idle();
        while let Some(entry) = idle.pop_back() {
            if entry.since.elapsed() < self.idle_timeout {
                return Some(entry.conn);
            }
            tracing::trace!(conn = %entry.conn.id(), "Idle connection expired");
        }
        None
    }
}

#[async_trait]
impl ConnectionPool for TcpPool {
    async fn obtain(&self, timeout: Duration) -> Result<Connection, PoolError> {
        if let Some(mut conn) = self.pop_idle() {
            conn.set_recycled(true);
            return Ok(conn);
        }

        let stream = match timeouts::within(timeout, TcpStream::connect(self.addr)).await {
            Some(Ok(stream)) => stream,
            Some(Err(source)) => {
                return Err(PoolError::Connect {
                    addr: self.addr,
                    source,
                })
            }
            None => {
                return Err(PoolError::Timeout {
                    addr: self.addr,
                    timeout,
                })
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(addr = %self.addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let conn = Connection::new(self.addr, Box::new(stream));
        tracing::trace!(conn = %conn.id(), addr = %self.addr, "Dialed backend connection");
        Ok(conn)
    }

    fn recycle(&self, mut conn: Connection) {
        conn.set_recycled(false);
        self.idle().push_back(IdleConnection {
            conn,
            since: Instant::now(),
        });
        self.reap_idle();
    }

    fn close(&self, conn: Connection) {
        tracing::trace!(conn = %conn.id(), "Closing backend connection");
        drop(conn);
    }

    fn idle_count(&self) -> usize {
        self.idle().len()
    }
}

/// Builds a [`TcpPool`] per backend.
#[derive(Debug, Clone)]
pub struct TcpPoolFactory {
    idle_timeout: Duration,
}

impl TcpPoolFactory {
    pub fn new(idle_timeout: Duration) -> Self {
        Self { idle_timeout }
    }
}

impl PoolFactory for TcpPoolFactory {
    fn create(&self, name: &str, addr: SocketAddr) -> Arc<dyn ConnectionPool> {
        tracing::debug!(backend = %name, addr = %addr, "Creating connection pool");
        Arc::new(TcpPool::new(addr, self.idle_timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_obtain_dials_then_recycles() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    drop(socket);
                });
            }
        });

        let pool = TcpPool::new(addr, Duration::from_secs(60));
        let conn = pool.obtain(Duration::from_secs(1)).await.unwrap();
        assert!(!conn.is_recycled());
        let id = conn.id();

        pool.recycle(conn);
        assert_eq!(pool.idle_count(), 1);

        let again = pool.obtain(Duration::from_secs(1)).await.unwrap();
        assert!(again.is_recycled());
        assert_eq!(again.id(), id);
        assert_eq!(pool.idle_count(), 0);

        pool.close(again);
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn test_expired_idle_is_not_reused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let pool = TcpPool::new(addr, Duration::from_millis(20));
        let conn = pool.obtain(Duration::from_secs(1)).await.unwrap();
        let id = conn.id();
        pool.recycle(conn);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let fresh = pool.obtain(Duration::from_secs(1)).await.unwrap();
        assert_ne!(fresh.id(), id);
        assert!(!fresh.is_recycled());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let pool = TcpPool::new(addr, Duration::from_secs(60));
        let err = pool.obtain(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, PoolError::Connect { .. }));
    }
}
