//! The bundled container security sample topology.

use std::collections::HashMap;

use crate::{ConfigResult, ContextOverrides, Topology, parse_topology, parse_topology_with_env};

/// KDL source of the sample.
pub const SAMPLE_TOPOLOGY: &str = include_str!("../topologies/container-security-sample.kdl");

/// Render the sample with the process environment.
pub fn container_security_sample(overrides: &ContextOverrides) -> ConfigResult<Topology> {
    parse_topology(SAMPLE_TOPOLOGY, overrides)
}

/// Render the sample with an explicit environment.
pub fn container_security_sample_with_env(
    overrides: &ContextOverrides,
    env: HashMap<String, String>,
) -> ConfigResult<Topology> {
    parse_topology_with_env(SAMPLE_TOPOLOGY, overrides, env)
}
