//! Health subsystem.
//!
//! # Data Flow
//! ```text
//! Active probing (active.rs):
//!     Periodic timer per registered backend
//!     → Connect (and optionally GET the probe url)
//!     → Slide result into the window
//!     → Backend::set_probe_health
//!
//! Verdict (state.rs):
//!     admin override + probe flag → healthy / unhealthy
//!     read lock-free by the director on every acquisition
//! ```
//!
//! # Design Decisions
//! - The director only reads health; probing is a separate collaborator
//!   reached through the `HealthProbe` trait
//! - Window/threshold hysteresis prevents flapping
//! - Health state is per-backend, shared by every director bound to it

use std::sync::Arc;

use crate::backend::Backend;
use crate::config::ProbeConfig;

pub mod active;
pub mod state;

pub use active::ActiveProber;
pub use state::AdminHealth;

/// Contract of the probe subsystem, as consumed by director lifecycle hooks.
pub trait HealthProbe: Send + Sync + std::fmt::Debug {
    /// Register a backend for probing. Seeds the initial health.
    fn register(&self, backend: &Arc<Backend>, spec: &ProbeConfig, host_header: Option<&str>);

    /// Begin polling a registered backend.
    fn start(&self, backend: &Arc<Backend>, spec: &ProbeConfig);

    /// Stop polling and forget the registration.
    fn unregister(&self, backend: &Arc<Backend>, spec: &ProbeConfig);
}
