//! Backend director for a caching HTTP reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!     request task                                         origin server
//!          │                                                     ▲
//!          ▼                                                     │
//!   ┌──────────────┐   ┌───────────────────┐   ┌─────────────┐   │
//!   │ FetchContext │──▶│  BackendDirector  │──▶│ ConnectionPool│──┘
//!   │  (fetch)     │   │ (director)        │   │ (net)       │
//!   └──────────────┘   │  acquire / fetch  │   └─────────────┘
//!                      │  retry / release  │
//!                      └─────────┬─────────┘
//!                                │ reads health, updates counters
//!                                ▼
//!                      ┌───────────────────┐   ┌─────────────┐
//!                      │      Backend      │◀──│ HealthProbe │
//!                      │ (backend registry)│   │ (health)    │
//!                      └───────────────────┘   └─────────────┘
//!
//!   admin: construct / publish / retire directors under one lock
//!   cross-cutting: config, observability, resilience (timeouts), lifecycle
//! ```

// Core
pub mod backend;
pub mod director;
pub mod fetch;
pub mod net;

// Control plane
pub mod admin;
pub mod config;
pub mod health;
pub mod lifecycle;

// Cross-cutting concerns
pub mod observability;
pub mod resilience;

pub use admin::{Admin, AdminContext, DirectorTable};
pub use backend::{Backend, BackendRegistry};
pub use config::{BackendConfig, DirectorConfig};
pub use director::{BackendDirector, Director, DirectorError, Services};
pub use fetch::{FetchContext, RequestHead};
