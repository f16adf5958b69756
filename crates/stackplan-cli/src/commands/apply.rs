//! Apply a topology, streaming progress.

use anyhow::{Context, Result};
use clap::Args;
use stackplan_config::Topology;
use stackplan_core::{ApplyOptions, Provisioner, UnitKind, UnitState};
use stackplan_deployer::{
    DryRunProvisioner, HelmProvisioner, KubernetesProvisioner, RoutingProvisioner,
};
use stackplan_scheduler::{DeploymentEvent, StackOrchestrator};
use std::sync::Arc;

use super::load_topology;
use crate::TopologyArgs;

#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Log what would be applied without touching any system
    #[arg(long)]
    pub dry_run: bool,

    /// Maximum number of units applied at once
    #[arg(long, short = 'p', default_value = "1", env = "STACKPLAN_PARALLEL")]
    pub parallel: usize,

    /// Keep applying units that do not depend on a failed unit
    #[arg(long)]
    pub continue_independent: bool,

    /// Treat cloud units as already provisioned elsewhere
    #[arg(long)]
    pub assume_cloud_provisioned: bool,

    /// Default namespace for manifest objects
    #[arg(long, env = "STACKPLAN_NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// Kubeconfig context passed to helm
    #[arg(long, env = "STACKPLAN_KUBE_CONTEXT")]
    pub kube_context: Option<String>,
}

impl ApplyArgs {
    fn apply_options(&self) -> ApplyOptions {
        ApplyOptions::default()
            .continue_independent_branches(self.continue_independent)
            .with_max_parallel(self.parallel)
    }
}

async fn build_provisioner(args: &ApplyArgs) -> Result<Arc<dyn Provisioner>> {
    if args.dry_run {
        return Ok(Arc::new(DryRunProvisioner::new()));
    }

    let kubernetes = KubernetesProvisioner::new(args.namespace.clone())
        .await
        .context("Failed to connect to Kubernetes")?;
    let mut helm = HelmProvisioner::new();
    if let Some(context) = &args.kube_context {
        helm = helm.with_kube_context(context.clone());
    }

    let mut router = RoutingProvisioner::new()
        .with_backend(UnitKind::Manifest, Arc::new(kubernetes))
        .with_backend(UnitKind::Helm, Arc::new(helm));
    if args.assume_cloud_provisioned {
        router = router.with_backend(UnitKind::Cloud, Arc::new(DryRunProvisioner::assumed()));
    }
    Ok(Arc::new(router))
}

/// Unresolved variables block a real apply; a dry run only lists them.
fn check_variables(topology: &Topology, args: &ApplyArgs) -> Result<()> {
    if !args.dry_run {
        return topology
            .require_resolved()
            .context("Refusing to apply a topology with unset variables");
    }
    for missing in &topology.unresolved {
        println!("! {}: ${{{}}} is not set", missing.unit, missing.variable);
    }
    Ok(())
}

/// Apply the topology and print events as they arrive.
pub async fn run(topology_args: &TopologyArgs, args: ApplyArgs) -> Result<()> {
    let topology = load_topology(topology_args)?;
    check_variables(&topology, &args)?;
    let provisioner = build_provisioner(&args).await?;
    let orchestrator = StackOrchestrator::with_options(provisioner, args.apply_options());

    let warnings = orchestrator
        .validate(&topology.graph)
        .await
        .context("Topology cannot be applied with the configured backends")?;
    for warning in &warnings {
        println!("! {} ({}): {}", warning.unit, warning.field, warning.message);
    }

    println!("Applying topology: {}", topology.name);
    if args.dry_run {
        println!("Dry run: nothing will be changed");
    }

    let (mut rx, report_handle) = orchestrator.execute(Arc::new(topology.graph))?;

    while let Some(event) = rx.recv().await {
        print_event(&event);
    }

    let report = report_handle.await.context("Apply task failed")?;

    println!("\n--- Unit Summary ---");
    for outcome in &report.outcomes {
        let status = match &outcome.state {
            UnitState::Applied => "✓ applied".to_string(),
            UnitState::Failed { message } => format!("✗ failed: {}", message),
            UnitState::Skipped { reason } => format!("⊘ skipped: {}", reason),
            UnitState::Pending => "○ pending".to_string(),
            UnitState::Running => "▶ running".to_string(),
        };
        println!("  {} - {}", outcome.unit, status);
    }

    if report.success {
        println!("\n✓ Topology applied!");
        Ok(())
    } else {
        anyhow::bail!("Apply failed: {} unit(s) failed", report.failed().len());
    }
}

fn print_event(event: &DeploymentEvent) {
    match event {
        DeploymentEvent::RunStarted { run_id, units } => {
            println!("--- Run {} started ({} units) ---\n", run_id, units);
        }
        DeploymentEvent::UnitStarted { unit } => {
            println!("▶ Unit '{}' started", unit);
        }
        DeploymentEvent::UnitApplied { unit, receipt } => match &receipt.detail {
            Some(detail) => println!("✓ Unit '{}' applied by {}: {}", unit, receipt.backend, detail),
            None => println!("✓ Unit '{}' applied by {}", unit, receipt.backend),
        },
        DeploymentEvent::UnitFailed { unit, message } => {
            println!("✗ Unit '{}' failed: {}", unit, message);
        }
        DeploymentEvent::UnitSkipped { unit, reason } => {
            println!("⊘ Unit '{}' skipped: {}", unit, reason);
        }
        DeploymentEvent::RunCompleted { success } => {
            if *success {
                println!("\n--- Run completed successfully ---");
            } else {
                println!("\n--- Run failed ---");
            }
        }
    }
}
