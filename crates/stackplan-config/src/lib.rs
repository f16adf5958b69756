//! KDL configuration parsing for stackplan.
//!
//! This crate handles:
//! - Context parameters and their defaults
//! - Topology definitions (topology.kdl)
//! - Variable interpolation inside payloads
//! - The bundled container security sample topology

pub mod context;
pub mod error;
pub mod sample;
pub mod topology;
pub mod value;
pub mod variables;

pub use context::{ContextOverrides, StackContext};
pub use error::{ConfigError, ConfigResult};
pub use topology::{Topology, UnresolvedVariable, parse_topology, parse_topology_with_env};
pub use variables::VariableContext;
