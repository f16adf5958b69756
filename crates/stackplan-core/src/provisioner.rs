//! Provisioner trait and apply request types.
//!
//! Provisioners perform the actual create/update of a unit against an
//! external system (Kubernetes API, Helm, a cloud provider).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DeployableUnit, Result, SecretHandle, UnitId, UnitKind};

/// Everything a provisioner needs to apply one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyRequest {
    pub unit: DeployableUnit,
    /// Secrets produced by earlier units that this unit reads.
    pub secrets: Vec<SecretHandle>,
}

/// Confirmation returned by a provisioner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyReceipt {
    pub unit: UnitId,
    /// Name of the provisioner that applied the unit.
    pub backend: String,
    /// Backend-specific detail (revision, object names...).
    pub detail: Option<String>,
    pub applied_at: DateTime<Utc>,
}

impl ApplyReceipt {
    pub fn new(unit: &UnitId, backend: impl Into<String>) -> Self {
        Self {
            unit: unit.clone(),
            backend: backend.into(),
            detail: None,
            applied_at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Warning from unit validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub unit: UnitId,
    pub field: String,
    pub message: String,
}

/// Trait for provisioning backends.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Name of this provisioner.
    fn name(&self) -> &'static str;

    /// Whether this provisioner can apply units of the given kind.
    fn supports(&self, kind: UnitKind) -> bool;

    /// Check a unit before any apply happens.
    async fn validate(&self, unit: &DeployableUnit) -> Result<Vec<ValidationWarning>>;

    /// Create or update a unit.
    async fn apply(&self, request: ApplyRequest) -> Result<ApplyReceipt>;
}
