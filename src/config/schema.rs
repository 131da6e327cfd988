//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! director. All types derive Serde traits for deserialization from TOML.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::fetch::http1::DEFAULT_MAX_BODY_BYTES;
use crate::health::AdminHealth;
use crate::resilience::timeouts::Timeouts;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DirectorConfig {
    /// Global timeout defaults, last link of the resolution chain.
    pub defaults: DefaultsConfig,

    /// Connection pool settings shared by every backend.
    pub pool: PoolConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// One director per backend entry.
    pub backends: Vec<BackendConfig>,
}

/// Global timeout defaults and fetch limits.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub connect_timeout_ms: u64,
    pub first_byte_timeout_ms: u64,
    pub between_bytes_timeout_ms: u64,

    /// Largest response body the fetcher will buffer.
    pub max_body_bytes: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3_500,
            first_byte_timeout_ms: 60_000,
            between_bytes_timeout_ms: 60_000,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl DefaultsConfig {
    pub fn timeouts(&self) -> Timeouts {
        Timeouts::from_millis(
            self.connect_timeout_ms,
            self.first_byte_timeout_ms,
            self.between_bytes_timeout_ms,
        )
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Idle connections older than this are closed instead of reused.
    pub idle_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 60,
        }
    }
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Interval of the periodic backend status report, 0 disables it.
    pub status_interval_secs: u64,
}

impl ObservabilityConfig {
    /// Period of the status report, `None` when disabled.
    pub fn status_interval(&self) -> Option<Duration> {
        (self.status_interval_secs > 0).then(|| Duration::from_secs(self.status_interval_secs))
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
            status_interval_secs: 30,
        }
    }
}

/// Backend server configuration, immutable once a director is built from it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Unique backend identifier, also its display name.
    pub name: String,

    /// Backend address (e.g., "127.0.0.1:3000").
    pub address: SocketAddr,

    /// Host header sent when the backend request carries none.
    #[serde(default)]
    pub host_header: Option<String>,

    /// Per-backend timeouts in milliseconds, 0 = use the global default.
    #[serde(default)]
    pub connect_timeout_ms: u64,
    #[serde(default)]
    pub first_byte_timeout_ms: u64,
    #[serde(default)]
    pub between_bytes_timeout_ms: u64,

    /// Maximum concurrent connections to this backend, 0 = unlimited.
    #[serde(default)]
    pub max_connections: usize,

    /// Initial administrative health override.
    #[serde(default)]
    pub admin_health: AdminHealth,

    /// Active health probe; without one the backend is never probed.
    #[serde(default)]
    pub probe: Option<ProbeConfig>,
}

impl BackendConfig {
    /// Minimal configuration with every optional field unset.
    pub fn new(name: impl Into<String>, address: SocketAddr) -> Self {
        Self {
            name: name.into(),
            address,
            host_header: None,
            connect_timeout_ms: 0,
            first_byte_timeout_ms: 0,
            between_bytes_timeout_ms: 0,
            max_connections: 0,
            admin_health: AdminHealth::Probe,
            probe: None,
        }
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts::from_millis(
            self.connect_timeout_ms,
            self.first_byte_timeout_ms,
            self.between_bytes_timeout_ms,
        )
    }
}

/// Active health probe configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Path to GET; `None` probes with a bare TCP connect.
    pub url: Option<String>,

    /// Polling interval in milliseconds.
    pub interval_ms: u64,

    /// Per-poll timeout in milliseconds.
    pub timeout_ms: u64,

    /// Number of recent results considered (1..=64).
    pub window: u32,

    /// Good results within the window required to be healthy.
    pub threshold: u32,

    /// Good results assumed at registration; defaults to threshold - 1.
    pub initial: Option<u32>,

    /// Status code counted as a good result.
    pub expected_response: u16,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            url: None,
            interval_ms: 5_000,
            timeout_ms: 2_000,
            window: 8,
            threshold: 3,
            initial: None,
            expected_response: 200,
        }
    }
}

impl ProbeConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn initial(&self) -> u32 {
        self.initial.unwrap_or_else(|| self.threshold.saturating_sub(1))
    }
}
