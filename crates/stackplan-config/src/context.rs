//! Stack context parameters.
//!
//! A context is the small set of named parameters a topology is rendered
//! with. Every parameter has a default; overrides come from the topology
//! file's `context` block and from the command line, later sources winning.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

use crate::{ConfigError, ConfigResult};

pub const CIDR_PREFIX: &str = "CIDR_PREFIX";
pub const DESIRED_CAPACITY: &str = "DESIRED_CAPACITY";
pub const NODE_INSTANCE_TYPE: &str = "NODE_INSTANCE_TYPE";
pub const CLUSTER_NAME: &str = "CLUSTER_NAME";

pub const DEFAULT_CIDR_PREFIX: &str = "10.0";
pub const DEFAULT_DESIRED_CAPACITY: u32 = 2;
pub const DEFAULT_NODE_INSTANCE_TYPE: &str = "m5.large";
pub const DEFAULT_CLUSTER_NAME: &str = "container-security-sample";

/// Fully resolved context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackContext {
    /// First two octets of the network range (e.g., "10.0").
    pub cidr_prefix: String,
    /// Number of cluster worker nodes.
    pub desired_capacity: u32,
    /// Instance type of the cluster worker nodes.
    pub node_instance_type: String,
    /// Name of the managed cluster.
    pub cluster_name: String,
}

impl Default for StackContext {
    fn default() -> Self {
        Self {
            cidr_prefix: DEFAULT_CIDR_PREFIX.to_string(),
            desired_capacity: DEFAULT_DESIRED_CAPACITY,
            node_instance_type: DEFAULT_NODE_INSTANCE_TYPE.to_string(),
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
        }
    }
}

impl StackContext {
    /// Resolve a context from defaults plus sparse overrides.
    pub fn resolve(overrides: &ContextOverrides) -> ConfigResult<Self> {
        Self::default().merge(overrides)
    }

    /// Apply overrides on top of this context.
    pub fn merge(&self, overrides: &ContextOverrides) -> ConfigResult<Self> {
        let mut ctx = self.clone();
        for (key, value) in &overrides.0 {
            match key.as_str() {
                CIDR_PREFIX => ctx.cidr_prefix = parse_cidr_prefix(value)?,
                DESIRED_CAPACITY => {
                    ctx.desired_capacity = value.trim().parse().map_err(|_| {
                        ConfigError::invalid(
                            DESIRED_CAPACITY,
                            format!("expected a non-negative integer, got '{value}'"),
                        )
                    })?;
                }
                NODE_INSTANCE_TYPE => ctx.node_instance_type = non_empty(key, value)?,
                CLUSTER_NAME => ctx.cluster_name = non_empty(key, value)?,
                other => warn!(key = %other, "Ignoring unknown context parameter"),
            }
        }
        Ok(ctx)
    }

    /// Context values exposed to `${context.*}` interpolation.
    pub fn variables(&self) -> BTreeMap<String, Value> {
        BTreeMap::from([
            ("cidr_prefix".to_string(), Value::from(self.cidr_prefix.clone())),
            ("desired_capacity".to_string(), Value::from(self.desired_capacity)),
            (
                "node_instance_type".to_string(),
                Value::from(self.node_instance_type.clone()),
            ),
            ("cluster_name".to_string(), Value::from(self.cluster_name.clone())),
        ])
    }
}

/// Sparse parameter overrides, keyed by normalized parameter name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextOverrides(BTreeMap<String, String>);

impl ContextOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter. `cidr-prefix`, `cidr_prefix` and `CIDR_PREFIX` all
    /// name the same parameter.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(normalize_key(key), value.into());
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(&normalize_key(key)).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Layer `other` on top of `self`.
    pub fn extend(&mut self, other: &ContextOverrides) {
        self.0
            .extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    /// Parse a `KEY=VALUE` pair as given on the command line.
    pub fn parse_pair(pair: &str) -> ConfigResult<(String, String)> {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            ConfigError::invalid("context", format!("expected KEY=VALUE, got '{pair}'"))
        })?;
        if key.trim().is_empty() {
            return Err(ConfigError::invalid("context", format!("empty key in '{pair}'")));
        }
        Ok((key.trim().to_string(), value.to_string()))
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for ContextOverrides {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut overrides = Self::new();
        for (key, value) in iter {
            overrides.set(key.as_ref(), value);
        }
        overrides
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().replace('-', "_").to_ascii_uppercase()
}

fn non_empty(key: &str, value: &str) -> ConfigResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigError::invalid(key, "must not be empty"));
    }
    Ok(value.to_string())
}

/// Accepts exactly two dot-separated decimal octets without leading zeros.
fn parse_cidr_prefix(value: &str) -> ConfigResult<String> {
    let value = value.trim();
    let octets: Vec<&str> = value.split('.').collect();
    let valid = octets.len() == 2 && octets.iter().all(|o| is_octet(o));
    if !valid {
        return Err(ConfigError::invalid(
            CIDR_PREFIX,
            format!("expected two octets like '10.0', got '{value}'"),
        ));
    }
    Ok(value.to_string())
}

fn is_octet(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| b.is_ascii_digit())
        && (s == "0" || !s.starts_with('0'))
        && s.parse::<u8>().is_ok()
}
