//! Core domain types and traits for stackplan.
//!
//! This crate contains:
//! - Unit and run identifiers
//! - Deployable units and their payloads
//! - Secret handles passed between producing and consuming units
//! - The deployment graph and its apply-order resolver
//! - Apply planning (sequential apply, ledger, report)
//! - The provisioner trait implemented by backends

pub mod error;
pub mod graph;
pub mod id;
pub mod plan;
pub mod provisioner;
pub mod secret;
pub mod unit;

pub use error::{Error, Result};
pub use graph::{DependencyEdge, DeploymentGraph};
pub use id::{ResourceId, UnitId};
pub use plan::{ApplyLedger, ApplyOptions, ApplyOrder, ApplyReport, SkipReason, UnitOutcome, UnitState};
pub use provisioner::{ApplyReceipt, ApplyRequest, Provisioner, ValidationWarning};
pub use secret::SecretHandle;
pub use unit::{CloudResource, DeployableUnit, HelmRelease, ManifestSet, UnitKind, UnitPayload};
