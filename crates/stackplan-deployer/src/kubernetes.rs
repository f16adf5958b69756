//! Kubernetes provisioner: server-side apply of manifest units.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::discovery::{self, Scope};
use kube::Client;
use serde_json::Value;
use stackplan_core::{
    ApplyReceipt, ApplyRequest, DeployableUnit, Error, Provisioner, Result, SecretHandle, UnitId,
    UnitKind, UnitPayload, ValidationWarning,
};
use tracing::{debug, info};

const FIELD_MANAGER: &str = "stackplan";

/// Applies manifest units with server-side apply.
pub struct KubernetesProvisioner {
    client: Client,
    namespace: String,
    secret_timeout: Duration,
    poll_interval: Duration,
}

impl KubernetesProvisioner {
    pub async fn new(namespace: impl Into<String>) -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self::with_client(client, namespace))
    }

    pub fn with_client(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            secret_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(5),
        }
    }

    /// How long to wait for a consumed secret to appear before failing.
    pub fn with_secret_timeout(mut self, timeout: Duration) -> Self {
        self.secret_timeout = timeout;
        self
    }

    /// Block until every consumed secret exists and carries its key.
    async fn wait_for_secrets(
        &self,
        unit: &UnitId,
        namespace: &str,
        secrets: &[SecretHandle],
    ) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        for handle in secrets {
            let deadline = tokio::time::Instant::now() + self.secret_timeout;
            loop {
                let found = api
                    .get_opt(&handle.name)
                    .await
                    .map_err(|e| apply_failed(unit, e))?;
                if found.as_ref().is_some_and(|s| secret_has_key(s, &handle.key)) {
                    debug!(unit = %unit, secret = %handle, "Secret available");
                    break;
                }
                if tokio::time::Instant::now() >= deadline {
                    return Err(Error::Timeout(format!(
                        "secret {handle} in namespace {namespace} for unit '{unit}'"
                    )));
                }
                debug!(unit = %unit, secret = %handle, "Waiting for secret");
                tokio::time::sleep(self.poll_interval).await;
            }
        }
        Ok(())
    }

    async fn apply_document(&self, unit: &UnitId, document: &Value) -> Result<String> {
        let target = ManifestTarget::from_document(document)
            .map_err(|message| Error::InvalidInput(format!("unit '{unit}': {message}")))?;

        let (resource, caps) = discovery::pinned_kind(&self.client, &target.gvk)
            .await
            .map_err(|e| apply_failed(unit, e))?;
        let api: Api<DynamicObject> = match caps.scope {
            Scope::Namespaced => {
                let ns = target.namespace.as_deref().unwrap_or(&self.namespace);
                Api::namespaced_with(self.client.clone(), ns, &resource)
            }
            Scope::Cluster => Api::all_with(self.client.clone(), &resource),
        };

        let object: DynamicObject = serde_json::from_value(document.clone())
            .map_err(|e| Error::InvalidInput(format!("unit '{unit}': {e}")))?;
        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(&target.name, &params, &Patch::Apply(&object))
            .await
            .map_err(|e| apply_failed(unit, e))?;

        info!(unit = %unit, kind = %target.gvk.kind, name = %target.name, "Applied object");
        Ok(format!("{}/{}", target.gvk.kind, target.name))
    }

    /// Namespace the unit's objects land in.
    fn unit_namespace<'a>(&'a self, documents: &'a [Value]) -> &'a str {
        documents
            .iter()
            .find_map(|d| d["metadata"]["namespace"].as_str())
            .unwrap_or(&self.namespace)
    }
}

#[async_trait]
impl Provisioner for KubernetesProvisioner {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    fn supports(&self, kind: UnitKind) -> bool {
        kind == UnitKind::Manifest
    }

    async fn validate(&self, unit: &DeployableUnit) -> Result<Vec<ValidationWarning>> {
        validate_manifests(unit)
    }

    async fn apply(&self, request: ApplyRequest) -> Result<ApplyReceipt> {
        let unit = &request.unit.id;
        let UnitPayload::Manifest(manifests) = &request.unit.payload else {
            return Err(Error::Unsupported(format!(
                "kubernetes cannot apply {} unit '{unit}'",
                request.unit.kind()
            )));
        };

        if !request.secrets.is_empty() {
            let namespace = self.unit_namespace(&manifests.documents);
            self.wait_for_secrets(unit, namespace, &request.secrets)
                .await?;
        }

        let mut applied = Vec::with_capacity(manifests.documents.len());
        for document in &manifests.documents {
            applied.push(self.apply_document(unit, document).await?);
        }

        Ok(ApplyReceipt::new(unit, self.name()).with_detail(applied.join(", ")))
    }
}

/// Where a manifest document is applied.
#[derive(Debug, Clone, PartialEq)]
struct ManifestTarget {
    gvk: GroupVersionKind,
    name: String,
    namespace: Option<String>,
}

impl ManifestTarget {
    fn from_document(document: &Value) -> std::result::Result<Self, String> {
        let api_version = document["apiVersion"]
            .as_str()
            .ok_or("missing apiVersion")?;
        let kind = document["kind"].as_str().ok_or("missing kind")?;
        let name = document["metadata"]["name"]
            .as_str()
            .ok_or("missing metadata.name")?;

        let (group, version) = api_version.split_once('/').unwrap_or(("", api_version));
        Ok(Self {
            gvk: GroupVersionKind::gvk(group, version, kind),
            name: name.to_string(),
            namespace: document["metadata"]["namespace"]
                .as_str()
                .map(str::to_string),
        })
    }
}

/// Check that every document names a kind and object.
pub fn validate_manifests(unit: &DeployableUnit) -> Result<Vec<ValidationWarning>> {
    let UnitPayload::Manifest(manifests) = &unit.payload else {
        return Ok(vec![]);
    };

    if manifests.documents.is_empty() {
        return Ok(vec![ValidationWarning {
            unit: unit.id.clone(),
            field: "document".to_string(),
            message: "unit has no documents".to_string(),
        }]);
    }

    for (i, document) in manifests.documents.iter().enumerate() {
        ManifestTarget::from_document(document).map_err(|message| {
            Error::InvalidInput(format!("unit '{}' document {i}: {message}", unit.id))
        })?;
    }
    Ok(vec![])
}

fn secret_has_key(secret: &Secret, key: &str) -> bool {
    secret.data.as_ref().is_some_and(|d| d.contains_key(key))
        || secret
            .string_data
            .as_ref()
            .is_some_and(|d| d.contains_key(key))
}

fn apply_failed(unit: &UnitId, e: kube::Error) -> Error {
    Error::ApplyFailed {
        unit: unit.clone(),
        message: e.to_string(),
    }
}
