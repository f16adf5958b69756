//! Secret references shared between units.

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Reference to a keyed secret that a producing unit makes available in the
/// target system. Consumers only ever hold the reference, never the value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{name}/{key}")]
pub struct SecretHandle {
    /// Name of the secret object.
    pub name: String,
    /// Key inside the secret holding the value.
    pub key: String,
}

impl SecretHandle {
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
        }
    }
}
