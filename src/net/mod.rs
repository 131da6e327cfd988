//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Director acquisition
//!     → pool.rs (idle connection, or dial within connect timeout)
//!     → connection.rs (id, peer, recycled flag, byte stream)
//!     → Owned by one request until released
//!
//! Director release
//!     → pool.rs recycle (park as idle) or close (drop the socket)
//! ```
//!
//! # Design Decisions
//! - Pool internals are a black box to the director: it only calls
//!   obtain / recycle / close
//! - Idle reaping belongs to the pool, not the director

pub mod connection;
pub mod pool;

pub use connection::{AsyncStream, BoxedStream, Connection, ConnectionId};
pub use pool::{ConnectionPool, PoolError, PoolFactory, TcpPool, TcpPoolFactory};
