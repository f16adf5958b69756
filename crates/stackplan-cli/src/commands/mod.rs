//! CLI command implementations.

pub mod apply;
pub mod plan;

use anyhow::{Context, Result};
use stackplan_config::{ContextOverrides, Topology, parse_topology, sample};
use stackplan_core::{Provisioner, UnitPayload, ValidationWarning};
use stackplan_deployer::HelmProvisioner;
use stackplan_deployer::kubernetes::validate_manifests;

use crate::TopologyArgs;

/// Load and validate the topology named by the arguments.
pub fn load_topology(args: &TopologyArgs) -> Result<Topology> {
    let overrides = context_overrides(&args.context)?;

    if args.sample {
        return sample::container_security_sample(&overrides)
            .context("Failed to render the bundled sample topology");
    }

    let content = std::fs::read_to_string(&args.path)
        .with_context(|| format!("Failed to read topology file: {}", args.path))?;
    parse_topology(&content, &overrides)
        .with_context(|| format!("Failed to parse topology: {}", args.path))
}

fn context_overrides(pairs: &[String]) -> Result<ContextOverrides> {
    pairs
        .iter()
        .map(|pair| ContextOverrides::parse_pair(pair))
        .collect::<Result<ContextOverrides, _>>()
        .context("Invalid --context override")
}

/// Check a topology and its payloads without applying anything.
pub async fn validate(args: &TopologyArgs) -> Result<()> {
    let topology = load_topology(args)?;
    check_topology(&topology).await
}

async fn check_topology(topology: &Topology) -> Result<()> {
    topology
        .require_resolved()
        .context("Topology references variables that are not set")?;
    let order = topology.graph.resolve_order()?;

    let helm = HelmProvisioner::new();
    let mut warnings: Vec<ValidationWarning> = Vec::new();
    for unit in order.units() {
        match &unit.payload {
            UnitPayload::Helm(_) => warnings.extend(helm.validate(unit).await?),
            UnitPayload::Manifest(_) => warnings.extend(validate_manifests(unit)?),
            UnitPayload::Cloud(_) => {}
        }
    }

    for warning in &warnings {
        println!("! {} ({}): {}", warning.unit, warning.field, warning.message);
    }
    println!(
        "Topology '{}' is valid: {} units, {} warnings",
        topology.name,
        order.len(),
        warnings.len()
    );
    Ok(())
}
