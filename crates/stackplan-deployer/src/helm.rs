//! Helm provisioner: installs or upgrades chart releases through the helm CLI.

use std::process::Stdio;

use async_trait::async_trait;
use stackplan_core::{
    ApplyReceipt, ApplyRequest, DeployableUnit, Error, HelmRelease, Provisioner, Result, UnitId,
    UnitKind, UnitPayload, ValidationWarning,
};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{error, info};

/// Runs `helm upgrade --install` for helm units.
pub struct HelmProvisioner {
    /// Path to helm binary
    helm_bin: String,
    kube_context: Option<String>,
    wait: bool,
}

impl Default for HelmProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl HelmProvisioner {
    pub fn new() -> Self {
        let helm_bin = std::env::var("HELM_BIN").unwrap_or_else(|_| "helm".to_string());
        Self::with_binary(helm_bin)
    }

    pub fn with_binary(helm_bin: impl Into<String>) -> Self {
        Self {
            helm_bin: helm_bin.into(),
            kube_context: None,
            wait: true,
        }
    }

    /// Target a specific kubeconfig context.
    pub fn with_kube_context(mut self, context: impl Into<String>) -> Self {
        self.kube_context = Some(context.into());
        self
    }

    /// Whether helm waits for release resources to become ready.
    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    /// Arguments for `helm upgrade --install`. Values are read from stdin.
    pub fn upgrade_args(&self, unit: &UnitId, release: &HelmRelease) -> Vec<String> {
        let mut args = vec![
            "upgrade".to_string(),
            "--install".to_string(),
            release.release_name(unit).to_string(),
            release.chart.clone(),
        ];
        if let Some(repo) = &release.repository {
            args.push("--repo".to_string());
            args.push(repo.clone());
        }
        if let Some(version) = &release.version {
            args.push("--version".to_string());
            args.push(version.clone());
        }
        args.push("--namespace".to_string());
        args.push(release.namespace_or_default().to_string());
        if release.create_namespace {
            args.push("--create-namespace".to_string());
        }
        args.push("--values".to_string());
        args.push("-".to_string());
        if self.wait {
            args.push("--wait".to_string());
        }
        if let Some(context) = &self.kube_context {
            args.push("--kube-context".to_string());
            args.push(context.clone());
        }
        args
    }

    async fn run(&self, unit: &UnitId, release: &HelmRelease) -> std::result::Result<String, HelmError> {
        let args = self.upgrade_args(unit, release);
        // JSON is valid YAML, so helm takes it as a values file.
        let values = serde_json::to_vec(&release.values)?;

        info!(unit = %unit, release = %release.release_name(unit), chart = %release.chart, "Running helm upgrade");

        let mut child = Command::new(&self.helm_bin)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&values).await?;
        }

        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let combined = format!("{}\n{}", stdout, stderr);

        if !output.status.success() {
            error!(unit = %unit, output = %combined, "Helm upgrade failed");
            return Err(HelmError::UpgradeFailed(combined.trim().to_string()));
        }

        Ok(stdout)
    }
}

#[async_trait]
impl Provisioner for HelmProvisioner {
    fn name(&self) -> &'static str {
        "helm"
    }

    fn supports(&self, kind: UnitKind) -> bool {
        kind == UnitKind::Helm
    }

    async fn validate(&self, unit: &DeployableUnit) -> Result<Vec<ValidationWarning>> {
        let UnitPayload::Helm(release) = &unit.payload else {
            return Ok(vec![]);
        };
        let mut warnings = Vec::new();
        if release.chart.trim().is_empty() {
            return Err(Error::InvalidInput(format!("unit '{}' has an empty chart", unit.id)));
        }
        if !release.values.is_object() {
            warnings.push(ValidationWarning {
                unit: unit.id.clone(),
                field: "values".to_string(),
                message: "values should be a map".to_string(),
            });
        }
        if release.version.is_some() && release.chart.contains("://") {
            warnings.push(ValidationWarning {
                unit: unit.id.clone(),
                field: "version".to_string(),
                message: "version is ignored for archive URLs".to_string(),
            });
        }
        Ok(warnings)
    }

    async fn apply(&self, request: ApplyRequest) -> Result<ApplyReceipt> {
        let unit = &request.unit.id;
        let UnitPayload::Helm(release) = &request.unit.payload else {
            return Err(Error::Unsupported(format!(
                "helm cannot apply {} unit '{unit}'",
                request.unit.kind()
            )));
        };

        self.run(unit, release).await.map_err(|e| Error::ApplyFailed {
            unit: unit.clone(),
            message: e.to_string(),
        })?;

        Ok(ApplyReceipt::new(unit, self.name()).with_detail(format!(
            "release {} in {}",
            release.release_name(unit),
            release.namespace_or_default()
        )))
    }
}

/// Helm CLI errors.
#[derive(Debug, thiserror::Error)]
pub enum HelmError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode values: {0}")]
    Values(#[from] serde_json::Error),

    #[error("Helm upgrade failed: {0}")]
    UpgradeFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_release() -> HelmRelease {
        let mut release = HelmRelease::new(
            "https://github.com/trendmicro/cloudone-container-security-helm/archive/master.tar.gz",
        );
        release.release = Some("trendmicro".to_string());
        release.namespace = Some("trendmicro-system".to_string());
        release.create_namespace = true;
        release
    }

    #[test]
    fn test_upgrade_args() {
        let helm = HelmProvisioner::with_binary("helm");
        let args = helm.upgrade_args(&UnitId::from("container-security"), &sample_release());
        assert_eq!(
            args,
            vec![
                "upgrade",
                "--install",
                "trendmicro",
                "https://github.com/trendmicro/cloudone-container-security-helm/archive/master.tar.gz",
                "--namespace",
                "trendmicro-system",
                "--create-namespace",
                "--values",
                "-",
                "--wait",
            ]
        );
    }

    #[test]
    fn test_upgrade_args_with_repo_and_context() {
        let mut release = HelmRelease::new("kubernetes-external-secrets");
        release.repository =
            Some("https://external-secrets.github.io/kubernetes-external-secrets".to_string());
        release.version = Some("8.5.0".to_string());
        let helm = HelmProvisioner::with_binary("helm")
            .with_wait(false)
            .with_kube_context("eks-sample");

        let args = helm.upgrade_args(&UnitId::from("external-secrets"), &release);
        assert_eq!(args[2], "external-secrets");
        let joined = args.join(" ");
        assert!(joined.contains("--repo https://external-secrets.github.io"));
        assert!(joined.contains("--version 8.5.0"));
        assert!(joined.contains("--namespace default"));
        assert!(joined.ends_with("--kube-context eks-sample"));
        assert!(!args.contains(&"--wait".to_string()));
        assert!(!args.contains(&"--create-namespace".to_string()));
    }

    #[tokio::test]
    async fn test_missing_binary_fails_apply() {
        let helm = HelmProvisioner::with_binary("/nonexistent/stackplan-helm");
        let request = ApplyRequest {
            unit: DeployableUnit::new("smartcheck", UnitPayload::Helm(sample_release())),
            secrets: vec![],
        };
        let err = helm.apply(request).await.unwrap_err();
        assert!(matches!(err, Error::ApplyFailed { ref unit, .. } if unit.as_str() == "smartcheck"));
    }

    #[tokio::test]
    async fn test_validate_flags_odd_values() {
        let mut release = sample_release();
        release.values = json!(["not", "a", "map"]);
        release.version = Some("1.0.0".to_string());
        let unit = DeployableUnit::new("container-security", UnitPayload::Helm(release));

        let warnings = HelmProvisioner::with_binary("helm").validate(&unit).await.unwrap();
        let fields: Vec<&str> = warnings.iter().map(|w| w.field.as_str()).collect();
        assert_eq!(fields, vec!["values", "version"]);
    }
}
