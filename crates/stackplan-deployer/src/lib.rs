//! Provisioning backends for stackplan.
//!
//! Provides provisioner implementations:
//! - Kubernetes (manifest units, server-side apply)
//! - Helm (chart releases via the helm CLI)
//! - Dry run (records without applying)
//! - Routing (dispatch by unit kind)

pub mod dry_run;
pub mod helm;
pub mod kubernetes;
pub mod routing;

pub use dry_run::DryRunProvisioner;
pub use helm::{HelmError, HelmProvisioner};
pub use kubernetes::KubernetesProvisioner;
pub use routing::RoutingProvisioner;
pub use stackplan_core::provisioner::{
    ApplyReceipt, ApplyRequest, Provisioner, ValidationWarning,
};
