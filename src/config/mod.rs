//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → DirectorConfig (validated, immutable)
//!     → one BackendConfig per director, held via Arc
//!
//! On reload (SIGHUP):
//!     loader.rs loads new config
//!     → admin builds new directors
//!     → atomic publish of the new director table
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Timeouts of 0 mean "unset" and fall through to the next level

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{BackendConfig, DefaultsConfig, DirectorConfig, ObservabilityConfig, PoolConfig, ProbeConfig};
