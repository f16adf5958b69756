//! Print the resolved apply order.

use anyhow::Result;
use serde::Serialize;
use stackplan_core::{DeploymentGraph, SecretHandle, UnitId, UnitKind};

use super::load_topology;
use crate::TopologyArgs;

/// One step of the plan.
#[derive(Debug, Serialize)]
pub struct PlanStep<'g> {
    pub position: usize,
    pub unit: &'g UnitId,
    pub kind: UnitKind,
    pub needs: Vec<&'g UnitId>,
    pub uses_secrets: Vec<&'g SecretHandle>,
    pub produces_secret: Option<&'g SecretHandle>,
}

pub fn steps<'g>(graph: &'g DeploymentGraph) -> Result<Vec<PlanStep<'g>>> {
    let order = graph.resolve_order()?;
    order
        .units()
        .enumerate()
        .map(|(i, unit)| -> Result<PlanStep<'g>> {
            Ok(PlanStep {
                position: i + 1,
                unit: &unit.id,
                kind: unit.kind(),
                needs: graph.dependencies_of(unit.id.as_str())?,
                uses_secrets: graph.consumed_secrets(unit.id.as_str())?,
                produces_secret: unit.produces.as_ref(),
            })
        })
        .collect()
}

pub fn show(args: &TopologyArgs, json: bool) -> Result<()> {
    let topology = load_topology(args)?;
    let steps = steps(&topology.graph)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&steps)?);
        return Ok(());
    }

    println!("Topology: {}", topology.name);
    println!(
        "Context: cidr={} capacity={} instance={} cluster={}",
        topology.context.cidr_prefix,
        topology.context.desired_capacity,
        topology.context.node_instance_type,
        topology.context.cluster_name
    );
    println!();
    for step in &steps {
        print!("{:>3}. {} [{}]", step.position, step.unit, step.kind);
        if !step.needs.is_empty() {
            let needs: Vec<&str> = step.needs.iter().map(|id| id.as_str()).collect();
            print!(" needs {}", needs.join(", "));
        }
        println!();
        for secret in &step.uses_secrets {
            println!("       uses secret {secret}");
        }
        if let Some(secret) = step.produces_secret {
            println!("       produces secret {secret}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackplan_config::ContextOverrides;
    use stackplan_config::sample::container_security_sample_with_env;
    use std::collections::HashMap;

    #[test]
    fn test_sample_plan_steps() {
        let topology =
            container_security_sample_with_env(&ContextOverrides::new(), HashMap::new()).unwrap();
        let steps = steps(&topology.graph).unwrap();

        assert_eq!(steps.len(), 11);
        assert_eq!(steps[0].unit.as_str(), "network");
        assert!(steps[0].needs.is_empty());

        let init = steps
            .iter()
            .find(|s| s.unit.as_str() == "database-initialize")
            .unwrap();
        assert_eq!(init.kind, UnitKind::Manifest);
        assert_eq!(init.uses_secrets.len(), 1);

        let json = serde_json::to_value(&steps).unwrap();
        assert_eq!(json[0]["unit"], "network");
        assert_eq!(json[0]["position"], 1);
    }
}
