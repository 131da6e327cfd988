//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Unique, non-empty backend names
//! - Non-zero body limit
//! - Probe parameters within range
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function: &DirectorConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use thiserror::Error;

use crate::config::schema::{DirectorConfig, ProbeConfig};

/// Largest probe window; results are kept in a 64-bit history.
pub const MAX_PROBE_WINDOW: u32 = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("defaults: max_body_bytes must be greater than zero")]
    ZeroMaxBody,

    #[error("backend #{index} has an empty name")]
    EmptyName { index: usize },

    #[error("backend name '{name}' is used more than once")]
    DuplicateName { name: String },

    #[error("backend '{backend}': probe {field} must be greater than zero")]
    ZeroProbeValue { backend: String, field: &'static str },

    #[error("backend '{backend}': probe window {window} outside 1..={max}")]
    ProbeWindow { backend: String, window: u32, max: u32 },

    #[error("backend '{backend}': probe {field} ({value}) exceeds window ({window})")]
    ProbeExceedsWindow {
        backend: String,
        field: &'static str,
        value: u32,
        window: u32,
    },
}

/// Check the whole configuration, collecting every problem.
pub fn validate_config(config: &DirectorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    if config.defaults.max_body_bytes == 0 {
        errors.push(ValidationError::ZeroMaxBody);
    }

    for (index, backend) in config.backends.iter().enumerate() {
        if backend.name.trim().is_empty() {
            errors.push(ValidationError::EmptyName { index });
        } else if !seen.insert(backend.name.as_str()) {
            errors.push(ValidationError::DuplicateName {
                name: backend.name.clone(),
            });
        }

        if let Some(probe) = &backend.probe {
            validate_probe(&backend.name, probe, &mut errors);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_probe(backend: &str, probe: &ProbeConfig, errors: &mut Vec<ValidationError>) {
    let zero = |field| ValidationError::ZeroProbeValue {
        backend: backend.to_string(),
        field,
    };
    if probe.interval_ms == 0 {
        errors.push(zero("interval_ms"));
    }
    if probe.timeout_ms == 0 {
        errors.push(zero("timeout_ms"));
    }
    if probe.threshold == 0 {
        errors.push(zero("threshold"));
    }

    if probe.window == 0 || probe.window > MAX_PROBE_WINDOW {
        errors.push(ValidationError::ProbeWindow {
            backend: backend.to_string(),
            window: probe.window,
            max: MAX_PROBE_WINDOW,
        });
        return;
    }

    for (field, value) in [("threshold", probe.threshold), ("initial", probe.initial())] {
        if value > probe.window {
            errors.push(ValidationError::ProbeExceedsWindow {
                backend: backend.to_string(),
                field,
                value,
                window: probe.window,
            });
        }
    }
}
