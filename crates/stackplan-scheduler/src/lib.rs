//! Apply orchestration for stackplan.
//!
//! Drives a provisioner over a resolved deployment graph, one unit at a
//! time or with bounded parallelism, and streams progress events.

pub mod orchestrator;

pub use orchestrator::{DeploymentEvent, StackOrchestrator};
