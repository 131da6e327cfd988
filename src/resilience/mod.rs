//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to backend:
//!     → timeouts.rs (resolve connect/first-byte/between-bytes chain)
//!     → pool obtain / header read / body read bounded by the resolved value
//!     → On stale recycled connection: director retries exactly once
//! ```
//!
//! # Design Decisions
//! - Every backend call is bounded by its resolved timeout; zero waits forever
//! - A timed-out call is an ordinary failure, not a cancellation path
//! - No backoff: the only retry is immediate and scoped to stale connections

pub mod timeouts;
