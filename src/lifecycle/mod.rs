//! Process lifecycle for the `run` command.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGHUP         → reload configuration, publish new directors
//!     SIGTERM/Ctrl-C → stop
//!
//! Shutdown (shutdown.rs):
//!     stop → broadcast to background tasks (status reporter) → exit
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::{Signal, SignalListener};
