//! A provisioner that records what it would apply.

use std::sync::Mutex;

use async_trait::async_trait;
use stackplan_core::{
    ApplyReceipt, ApplyRequest, DeployableUnit, Provisioner, Result, UnitId, UnitKind,
    UnitPayload, ValidationWarning,
};
use tracing::info;

/// Accepts every unit without touching any external system.
pub struct DryRunProvisioner {
    name: &'static str,
    applied: Mutex<Vec<UnitId>>,
}

impl Default for DryRunProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl DryRunProvisioner {
    pub fn new() -> Self {
        Self::named("dry-run")
    }

    /// Used for units provisioned outside stackplan.
    pub fn assumed() -> Self {
        Self::named("assumed")
    }

    fn named(name: &'static str) -> Self {
        Self {
            name,
            applied: Mutex::new(Vec::new()),
        }
    }

    /// Units seen so far, in apply order.
    pub fn applied(&self) -> Vec<UnitId> {
        self.applied
            .lock()
            .map(|applied| applied.clone())
            .unwrap_or_default()
    }
}

fn describe(unit: &DeployableUnit) -> String {
    match &unit.payload {
        UnitPayload::Cloud(res) => format!("cloud resource {}", res.resource),
        UnitPayload::Helm(release) => format!(
            "helm release {} from {}",
            release.release_name(&unit.id),
            release.chart
        ),
        UnitPayload::Manifest(set) => format!("{} manifest document(s)", set.documents.len()),
    }
}

#[async_trait]
impl Provisioner for DryRunProvisioner {
    fn name(&self) -> &'static str {
        self.name
    }

    fn supports(&self, _kind: UnitKind) -> bool {
        true
    }

    async fn validate(&self, _unit: &DeployableUnit) -> Result<Vec<ValidationWarning>> {
        Ok(vec![])
    }

    async fn apply(&self, request: ApplyRequest) -> Result<ApplyReceipt> {
        let detail = describe(&request.unit);
        info!(
            unit = %request.unit.id,
            backend = self.name,
            secrets = request.secrets.len(),
            "{detail}"
        );
        if let Ok(mut applied) = self.applied.lock() {
            applied.push(request.unit.id.clone());
        }
        Ok(ApplyReceipt::new(&request.unit.id, self.name).with_detail(detail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stackplan_core::{CloudResource, HelmRelease};

    #[tokio::test]
    async fn test_records_applied_units() {
        let dry_run = DryRunProvisioner::new();
        for unit in [
            DeployableUnit::new(
                "network",
                UnitPayload::Cloud(CloudResource::new("vpc", json!({"cidr": "10.0.0.0/16"}))),
            ),
            DeployableUnit::new("smartcheck", UnitPayload::Helm(HelmRelease::new("smartcheck"))),
        ] {
            let receipt = dry_run
                .apply(ApplyRequest {
                    unit,
                    secrets: vec![],
                })
                .await
                .unwrap();
            assert_eq!(receipt.backend, "dry-run");
        }
        assert_eq!(
            dry_run.applied(),
            vec![UnitId::from("network"), UnitId::from("smartcheck")]
        );
    }

    #[tokio::test]
    async fn test_receipt_describes_unit() {
        let receipt = DryRunProvisioner::assumed()
            .apply(ApplyRequest {
                unit: DeployableUnit::new(
                    "database",
                    UnitPayload::Cloud(CloudResource::new("rds-instance", json!({}))),
                ),
                secrets: vec![],
            })
            .await
            .unwrap();
        assert_eq!(receipt.backend, "assumed");
        assert_eq!(receipt.detail.as_deref(), Some("cloud resource rds-instance"));
    }
}
