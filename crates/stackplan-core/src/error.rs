//! Error types for stackplan.

use thiserror::Error;

use crate::UnitId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("duplicate unit: {0}")]
    DuplicateUnit(UnitId),

    #[error("unknown unit: {0}")]
    UnknownUnit(UnitId),

    #[error("unit '{consumer}' uses a secret from '{producer}', which produces none")]
    SecretNotProduced { consumer: UnitId, producer: UnitId },

    #[error("cycle detected in dependencies: {}", cycle_path(.units))]
    CycleDetected { units: Vec<UnitId> },

    #[error("apply failed for unit '{unit}': {message}")]
    ApplyFailed { unit: UnitId, message: String },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Renders `a -> b -> a` for a cycle listed in dependency order.
fn cycle_path(units: &[UnitId]) -> String {
    let mut parts: Vec<&str> = units.iter().map(UnitId::as_str).collect();
    if let Some(first) = units.first() {
        parts.push(first.as_str());
    }
    parts.join(" -> ")
}

pub type Result<T> = std::result::Result<T, Error>;
