//! Backend health verdict.
//!
//! # Inputs
//! - Administrative override: `probe`, `healthy` or `sick`
//! - Probe-derived flag, written asynchronously by the prober
//!
//! # Verdict
//! ```text
//! admin = sick                        → unhealthy
//! admin = probe  and probe unhealthy  → unhealthy
//! anything else                       → healthy
//! ```
//!
//! # Design Decisions
//! - Reads are lock-free; a transiently stale verdict is acceptable
//! - The change timestamp follows the effective verdict, not the raw flag

use serde::{Deserialize, Serialize};

/// Administrative health override.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminHealth {
    /// Follow the probe.
    #[default]
    Probe = 0,
    /// Forced healthy.
    Healthy = 1,
    /// Forced sick.
    Sick = 2,
}

impl From<u8> for AdminHealth {
    fn from(val: u8) -> Self {
        match val {
            1 => AdminHealth::Healthy,
            2 => AdminHealth::Sick,
            _ => AdminHealth::Probe,
        }
    }
}

impl std::fmt::Display for AdminHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdminHealth::Probe => write!(f, "probe"),
            AdminHealth::Healthy => write!(f, "healthy"),
            AdminHealth::Sick => write!(f, "sick"),
        }
    }
}

/// Combine the override with the probe flag.
pub fn verdict(admin: AdminHealth, probe_healthy: bool) -> bool {
    match admin {
        AdminHealth::Sick => false,
        AdminHealth::Probe => probe_healthy,
        AdminHealth::Healthy => true,
    }
}
