//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Director operations produce:
//!     → events.rs (BackendClose / BackendReuse / FetchError records)
//!     → stats.rs (atomic counters, mirrored into `metrics`)
//!     → logging.rs (subscriber setup for everything above)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → metrics.rs (Prometheus scrape endpoint)
//! ```
//!
//! # Design Decisions
//! - Events and counters are side-effect sinks; no director logic reads them
//! - Counters are cheap (relaxed atomic increments)
//! - Transaction id flows through every event

pub mod events;
pub mod logging;
pub mod metrics;
pub mod stats;

pub use events::BackendEvent;
pub use stats::{BackendStats, MainStats, MainStatsSnapshot};
