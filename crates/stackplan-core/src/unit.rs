//! Deployable units and their payloads.
//!
//! A unit is one artifact applied to the target environment: a cloud
//! resource, a Helm release or a set of Kubernetes manifest documents.
//! Payloads are opaque to the planner; only backends look inside them.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{SecretHandle, UnitId};

/// One declared artifact of a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployableUnit {
    /// Identifier, unique within the deployment graph.
    pub id: UnitId,
    /// What gets applied.
    pub payload: UnitPayload,
    /// Secret this unit makes available to later units.
    pub produces: Option<SecretHandle>,
}

impl DeployableUnit {
    pub fn new(id: impl Into<UnitId>, payload: UnitPayload) -> Self {
        Self {
            id: id.into(),
            payload,
            produces: None,
        }
    }

    /// Declare the secret this unit produces.
    pub fn producing(mut self, secret: SecretHandle) -> Self {
        self.produces = Some(secret);
        self
    }

    pub fn kind(&self) -> UnitKind {
        self.payload.kind()
    }
}

/// Discriminant of a [`UnitPayload`], used for backend routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    #[display("cloud")]
    Cloud,
    #[display("helm")]
    Helm,
    #[display("manifest")]
    Manifest,
}

/// Provider-specific content of a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitPayload {
    /// A resource owned by the cloud provider (network, cluster, database...).
    Cloud(CloudResource),
    /// A Helm chart release installed into a cluster.
    Helm(HelmRelease),
    /// Kubernetes manifest documents applied as a set.
    Manifest(ManifestSet),
}

impl UnitPayload {
    pub fn kind(&self) -> UnitKind {
        match self {
            UnitPayload::Cloud(_) => UnitKind::Cloud,
            UnitPayload::Helm(_) => UnitKind::Helm,
            UnitPayload::Manifest(_) => UnitKind::Manifest,
        }
    }
}

/// A cloud resource declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudResource {
    /// Resource type understood by the cloud backend (e.g., "vpc", "eks-cluster").
    pub resource: String,
    /// Resource properties.
    pub properties: Value,
}

impl CloudResource {
    pub fn new(resource: impl Into<String>, properties: Value) -> Self {
        Self {
            resource: resource.into(),
            properties,
        }
    }
}

/// A Helm chart release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelmRelease {
    /// Chart name or archive URL.
    pub chart: String,
    /// Release name. Defaults to the unit id.
    pub release: Option<String>,
    /// Chart repository URL.
    pub repository: Option<String>,
    /// Chart version constraint.
    pub version: Option<String>,
    /// Target namespace. Defaults to "default".
    pub namespace: Option<String>,
    /// Create the namespace if it does not exist.
    pub create_namespace: bool,
    /// Chart values.
    pub values: Value,
}

impl HelmRelease {
    pub fn new(chart: impl Into<String>) -> Self {
        Self {
            chart: chart.into(),
            release: None,
            repository: None,
            version: None,
            namespace: None,
            create_namespace: false,
            values: Value::Object(Default::default()),
        }
    }

    /// Release name, falling back to the owning unit's id.
    pub fn release_name<'a>(&'a self, unit: &'a UnitId) -> &'a str {
        self.release.as_deref().unwrap_or(unit.as_str())
    }

    pub fn namespace_or_default(&self) -> &str {
        self.namespace.as_deref().unwrap_or("default")
    }
}

/// Kubernetes manifest documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestSet {
    pub documents: Vec<Value>,
}

impl ManifestSet {
    pub fn new(documents: Vec<Value>) -> Self {
        Self { documents }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_release_name_defaults_to_unit_id() {
        let unit = UnitId::from("external-secrets");
        let mut release = HelmRelease::new("kubernetes-external-secrets");
        assert_eq!(release.release_name(&unit), "external-secrets");

        release.release = Some("kes".to_string());
        assert_eq!(release.release_name(&unit), "kes");
        assert_eq!(release.namespace_or_default(), "default");
    }

    #[test]
    fn test_payload_serializes_with_kind_tag() {
        let payload = UnitPayload::Cloud(CloudResource::new("vpc", json!({"cidr": "10.0.0.0/16"})));
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["kind"], "cloud");
        assert_eq!(value["resource"], "vpc");
        assert_eq!(payload.kind(), UnitKind::Cloud);
    }
}
