//! Dispatches units to a backend by kind.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use stackplan_core::{
    ApplyReceipt, ApplyRequest, DeployableUnit, Error, Provisioner, Result, UnitKind,
    ValidationWarning,
};
use tracing::debug;

/// Routes each unit to the provisioner registered for its kind.
///
/// Kinds without a registered backend are rejected. There is no built-in
/// backend for cloud units.
#[derive(Default, Clone)]
pub struct RoutingProvisioner {
    backends: HashMap<UnitKind, Arc<dyn Provisioner>>,
}

impl RoutingProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, kind: UnitKind, provisioner: Arc<dyn Provisioner>) -> Self {
        self.backends.insert(kind, provisioner);
        self
    }

    fn backend(&self, unit: &DeployableUnit) -> Result<&Arc<dyn Provisioner>> {
        self.backends.get(&unit.kind()).ok_or_else(|| {
            Error::Unsupported(format!(
                "no provisioner registered for {} unit '{}'",
                unit.kind(),
                unit.id
            ))
        })
    }
}

#[async_trait]
impl Provisioner for RoutingProvisioner {
    fn name(&self) -> &'static str {
        "router"
    }

    fn supports(&self, kind: UnitKind) -> bool {
        self.backends
            .get(&kind)
            .is_some_and(|backend| backend.supports(kind))
    }

    async fn validate(&self, unit: &DeployableUnit) -> Result<Vec<ValidationWarning>> {
        self.backend(unit)?.validate(unit).await
    }

    async fn apply(&self, request: ApplyRequest) -> Result<ApplyReceipt> {
        let backend = self.backend(&request.unit)?;
        debug!(unit = %request.unit.id, backend = backend.name(), "Routing unit");
        backend.apply(request).await
    }
}
