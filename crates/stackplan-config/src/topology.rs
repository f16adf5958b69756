//! Topology configuration parsing.
//!
//! A topology file declares the units of one deployment:
//!
//! ```kdl
//! topology "demo"
//!
//! context {
//!     cluster-name "demo-cluster"
//! }
//!
//! unit "network" kind="cloud" resource="vpc" {
//!     properties {
//!         cidr "${context.cidr_prefix}.0.0/16"
//!     }
//! }
//!
//! unit "controller" kind="helm" needs="network" {
//!     chart "kubernetes-external-secrets"
//! }
//! ```

use kdl::{KdlDocument, KdlNode};
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;
use stackplan_core::{
    CloudResource, DeployableUnit, DeploymentGraph, HelmRelease, ManifestSet, SecretHandle,
    UnitId, UnitPayload,
};

use crate::value::{document_to_value, node_to_value, scalar};
use crate::variables::placeholders;
use crate::{ConfigError, ConfigResult, ContextOverrides, StackContext, VariableContext};

/// A parsed topology: its resolved context and validated graph.
#[derive(Debug, Clone)]
pub struct Topology {
    pub name: String,
    pub context: StackContext,
    pub graph: DeploymentGraph,
    /// Placeholders that no variable resolved, per unit.
    pub unresolved: Vec<UnresolvedVariable>,
}

/// A `${...}` placeholder left in a unit after rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedVariable {
    pub unit: UnitId,
    pub variable: String,
}

impl Topology {
    /// Fail when any unit still carries an unresolved placeholder.
    pub fn require_resolved(&self) -> ConfigResult<()> {
        if self.unresolved.is_empty() {
            return Ok(());
        }
        let listed: Vec<String> = self
            .unresolved
            .iter()
            .map(|u| format!("${{{}}} in unit '{}'", u.variable, u.unit))
            .collect();
        Err(ConfigError::UnresolvedVariables(listed.join(", ")))
    }
}

/// A unit plus the edges it declared, before graph assembly.
struct UnitDecl {
    unit: DeployableUnit,
    needs: Vec<String>,
    uses_secrets: Vec<String>,
}

/// Parse a topology using the process environment for `${env.*}`.
pub fn parse_topology(kdl: &str, overrides: &ContextOverrides) -> ConfigResult<Topology> {
    parse_topology_with_env(kdl, overrides, std::env::vars().collect())
}

/// Parse a topology with an explicit environment for `${env.*}`.
pub fn parse_topology_with_env(
    kdl: &str,
    overrides: &ContextOverrides,
    env: HashMap<String, String>,
) -> ConfigResult<Topology> {
    let doc: KdlDocument = kdl.parse()?;

    let mut name = String::new();
    let mut file_overrides = ContextOverrides::new();
    let mut file_vars = HashMap::new();

    for node in doc.nodes() {
        match node.name().value() {
            "topology" => {
                name = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("topology name".to_string()))?;
            }
            "context" => {
                for child in child_nodes(node) {
                    let value = get_first_arg_as_string(child).ok_or_else(|| {
                        ConfigError::MissingField(format!(
                            "value for context parameter '{}'",
                            child.name().value()
                        ))
                    })?;
                    file_overrides.set(child.name().value(), value);
                }
            }
            "vars" => {
                for child in child_nodes(node) {
                    if let Some(val) = get_first_arg_as_string(child) {
                        file_vars.insert(child.name().value().to_string(), val);
                    }
                }
            }
            _ => {}
        }
    }

    if name.is_empty() {
        return Err(ConfigError::MissingField("topology name".to_string()));
    }

    // Command-line overrides win over the file's context block
    file_overrides.extend(overrides);
    let context = StackContext::resolve(&file_overrides)?;

    let mut vars = VariableContext::new(&context);
    vars.env = env;
    vars.vars = file_vars;
    vars.topology = name.clone();

    let decls = doc
        .nodes()
        .iter()
        .filter(|n| n.name().value() == "unit")
        .map(|n| parse_unit(n, &vars))
        .collect::<ConfigResult<Vec<_>>>()?;

    let unresolved = unresolved_variables(&decls);
    for missing in &unresolved {
        warn!(unit = %missing.unit, variable = %missing.variable, "Unresolved variable");
    }
    let graph = build_graph(decls)?;

    Ok(Topology {
        name,
        context,
        graph,
        unresolved,
    })
}

fn unresolved_variables(decls: &[UnitDecl]) -> Vec<UnresolvedVariable> {
    let mut found = Vec::new();
    for decl in decls {
        let mut values = match &decl.unit.payload {
            UnitPayload::Cloud(res) => vec![Value::from(res.resource.as_str()), res.properties.clone()],
            UnitPayload::Helm(release) => vec![
                Value::from(release.chart.as_str()),
                serde_json::json!([release.release, release.repository, release.version, release.namespace]),
                release.values.clone(),
            ],
            UnitPayload::Manifest(set) => set.documents.clone(),
        };
        if let Some(secret) = &decl.unit.produces {
            values.push(serde_json::json!([secret.name, secret.key]));
        }
        for variable in placeholders(&Value::Array(values)) {
            found.push(UnresolvedVariable {
                unit: decl.unit.id.clone(),
                variable,
            });
        }
    }
    found
}

fn build_graph(decls: Vec<UnitDecl>) -> ConfigResult<DeploymentGraph> {
    let mut graph = DeploymentGraph::new();
    let mut edges = Vec::new();

    for decl in decls {
        let id = decl.unit.id.to_string();
        graph.add_unit(decl.unit).map_err(|e| match e {
            stackplan_core::Error::DuplicateUnit(id) => ConfigError::Duplicate(format!("unit '{id}'")),
            other => ConfigError::Graph(other),
        })?;
        edges.push((id, decl.needs, decl.uses_secrets));
    }

    for (id, needs, uses_secrets) in &edges {
        for dep in needs {
            if !graph.contains(dep) {
                return Err(ConfigError::InvalidReference(format!(
                    "unit '{id}' depends on unknown unit '{dep}'"
                )));
            }
            graph.add_dependency(id, dep)?;
        }
        for producer in uses_secrets {
            if !graph.contains(producer) {
                return Err(ConfigError::InvalidReference(format!(
                    "unit '{id}' uses a secret from unknown unit '{producer}'"
                )));
            }
            graph.bind_secret(id, producer)?;
        }
    }

    // Check for cycles
    graph.resolve_order()?;

    Ok(graph)
}

fn parse_unit(node: &KdlNode, vars: &VariableContext) -> ConfigResult<UnitDecl> {
    let id = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("unit name".to_string()))?;
    let kind = get_string_prop(node, "kind")
        .ok_or_else(|| ConfigError::MissingField(format!("kind for unit '{id}'")))?;
    let needs = get_string_list_prop(node, "needs");

    let mut produces = None;
    let mut uses_secrets = Vec::new();
    for child in child_nodes(node) {
        match child.name().value() {
            "produces-secret" => {
                let name = get_string_prop(child, "name").ok_or_else(|| {
                    ConfigError::MissingField(format!("produces-secret name for unit '{id}'"))
                })?;
                let key = get_string_prop(child, "key").ok_or_else(|| {
                    ConfigError::MissingField(format!("produces-secret key for unit '{id}'"))
                })?;
                produces = Some(SecretHandle::new(
                    vars.interpolate(&name),
                    vars.interpolate(&key),
                ));
            }
            "uses-secret" => {
                let from = get_string_prop(child, "from")
                    .or_else(|| get_first_string_arg(child))
                    .ok_or_else(|| {
                        ConfigError::MissingField(format!("uses-secret source for unit '{id}'"))
                    })?;
                uses_secrets.push(from);
            }
            _ => {}
        }
    }

    let payload = match kind.as_str() {
        "cloud" => parse_cloud(node, &id, vars)?,
        "helm" => parse_helm(node, &id, vars)?,
        "manifest" => parse_manifest(node, &id, vars)?,
        other => {
            return Err(ConfigError::invalid(
                format!("kind for unit '{id}'"),
                format!("unknown unit kind: {other}"),
            ));
        }
    };

    let mut unit = DeployableUnit::new(id, payload);
    unit.produces = produces;

    Ok(UnitDecl {
        unit,
        needs,
        uses_secrets,
    })
}

fn parse_cloud(node: &KdlNode, id: &str, vars: &VariableContext) -> ConfigResult<UnitPayload> {
    let resource = get_string_prop(node, "resource")
        .ok_or_else(|| ConfigError::MissingField(format!("resource for unit '{id}'")))?;

    let mut properties = Value::Object(Default::default());
    for child in child_nodes(node) {
        if child.name().value() == "properties" {
            properties = node_to_value(child)?;
        }
    }

    Ok(UnitPayload::Cloud(CloudResource::new(
        vars.interpolate(&resource),
        vars.interpolate_value(&properties),
    )))
}

fn parse_helm(node: &KdlNode, id: &str, vars: &VariableContext) -> ConfigResult<UnitPayload> {
    let mut chart = None;
    let mut release = HelmRelease::new(String::new());

    for child in child_nodes(node) {
        let text = || get_first_string_arg(child).map(|s| vars.interpolate(&s));
        match child.name().value() {
            "chart" => chart = text(),
            "release" => release.release = text(),
            "repository" => release.repository = text(),
            "version" => release.version = text(),
            "namespace" => release.namespace = text(),
            "create-namespace" => {
                release.create_namespace = child
                    .entries()
                    .iter()
                    .find(|e| e.name().is_none())
                    .and_then(|e| e.value().as_bool())
                    .unwrap_or(true);
            }
            "values" => {
                release.values = match child.children() {
                    Some(children) => vars.interpolate_value(&document_to_value(children)?),
                    None => Value::Object(Default::default()),
                };
            }
            _ => {}
        }
    }

    release.chart =
        chart.ok_or_else(|| ConfigError::MissingField(format!("chart for unit '{id}'")))?;
    Ok(UnitPayload::Helm(release))
}

fn parse_manifest(node: &KdlNode, id: &str, vars: &VariableContext) -> ConfigResult<UnitPayload> {
    let mut documents = Vec::new();
    for child in child_nodes(node) {
        if child.name().value() != "document" {
            continue;
        }
        let doc = node_to_value(child)?;
        if !doc.is_object() {
            return Err(ConfigError::invalid(
                format!("document in unit '{id}'"),
                "a manifest document must be a block",
            ));
        }
        documents.push(vars.interpolate_value(&doc));
    }

    if documents.is_empty() {
        return Err(ConfigError::MissingField(format!(
            "document for unit '{id}'"
        )));
    }
    Ok(UnitPayload::Manifest(ManifestSet::new(documents)))
}

// Helper functions for extracting values from KDL nodes

fn child_nodes(node: &KdlNode) -> &[KdlNode] {
    node.children().map(|c| c.nodes()).unwrap_or(&[])
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

/// First argument rendered as text, whatever its KDL type.
fn get_first_arg_as_string(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| match scalar(e.value()) {
            Value::String(s) => s,
            other => other.to_string(),
        })
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_string_list_prop(node: &KdlNode, name: &str) -> Vec<String> {
    let mut result = Vec::new();

    // Repeated properties like needs="a" needs="b"
    for entry in node.entries() {
        if let Some(entry_name) = entry.name() {
            if entry_name.value() == name {
                if let Some(s) = entry.value().as_string() {
                    result.push(s.to_string());
                }
            }
        }
    }

    if !result.is_empty() {
        return result;
    }

    // Block syntax: needs "a" "b"
    for child in child_nodes(node) {
        if child.name().value() == name {
            return get_all_string_args(child);
        }
    }

    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackplan_core::UnitKind;

    fn parse(kdl: &str) -> ConfigResult<Topology> {
        parse_topology_with_env(kdl, &ContextOverrides::new(), HashMap::new())
    }

    #[test]
    fn test_parse_simple_topology() {
        let kdl = r#"
            topology "simple"

            unit "network" kind="cloud" resource="vpc" {
                properties {
                    cidr "${context.cidr_prefix}.0.0/16"
                }
            }
        "#;

        let topology = parse(kdl).unwrap();
        assert_eq!(topology.name, "simple");
        assert_eq!(topology.graph.len(), 1);
        let unit = topology.graph.unit("network").unwrap();
        match &unit.payload {
            UnitPayload::Cloud(res) => {
                assert_eq!(res.resource, "vpc");
                assert_eq!(res.properties["cidr"], "10.0.0.0/16");
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_parse_dependencies_and_secrets() {
        let kdl = r#"
            topology "deps"

            unit "controller" kind="helm" {
                chart "kubernetes-external-secrets"
                repository "https://external-secrets.github.io/kubernetes-external-secrets"
                create-namespace
            }

            unit "sync" kind="manifest" needs="controller" {
                produces-secret name="db-secret" key="dbcredential"
                document {
                    apiVersion "kubernetes-client.io/v1"
                    kind "ExternalSecret"
                    metadata {
                        name "db-secret"
                    }
                }
            }

            unit "job" kind="manifest" {
                uses-secret from="sync"
                document {
                    apiVersion "batch/v1"
                    kind "Job"
                }
            }
        "#;

        let topology = parse(kdl).unwrap();
        let graph = &topology.graph;
        assert_eq!(graph.dependencies_of("sync").unwrap()[0].as_str(), "controller");
        assert_eq!(graph.dependencies_of("job").unwrap()[0].as_str(), "sync");
        assert_eq!(
            graph.consumed_secrets("job").unwrap(),
            vec![&SecretHandle::new("db-secret", "dbcredential")]
        );
        let controller = graph.unit("controller").unwrap();
        assert_eq!(controller.kind(), UnitKind::Helm);
        match &controller.payload {
            UnitPayload::Helm(release) => assert!(release.create_namespace),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_needs_block_syntax() {
        let kdl = r#"
            topology "block"
            unit "a" kind="cloud" resource="x"
            unit "b" kind="cloud" resource="x"
            unit "c" kind="cloud" resource="x" {
                needs "a" "b"
            }
        "#;
        let topology = parse(kdl).unwrap();
        assert_eq!(topology.graph.dependencies_of("c").unwrap().len(), 2);
    }

    #[test]
    fn test_context_block_and_cli_precedence() {
        let kdl = r#"
            topology "ctx"

            context {
                cluster-name "from-file"
                desired-capacity 4
            }

            unit "cluster" kind="cloud" resource="eks-cluster" {
                properties {
                    name "${context.cluster_name}"
                    default-capacity "${context.desired_capacity}"
                }
            }
        "#;

        let overrides = ContextOverrides::new().with("CLUSTER_NAME", "from-cli");
        let topology = parse_topology_with_env(kdl, &overrides, HashMap::new()).unwrap();
        assert_eq!(topology.context.cluster_name, "from-cli");
        assert_eq!(topology.context.desired_capacity, 4);

        match &topology.graph.unit("cluster").unwrap().payload {
            UnitPayload::Cloud(res) => {
                assert_eq!(res.properties["name"], "from-cli");
                assert_eq!(res.properties["default-capacity"], 4);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_detect_missing_dependency() {
        let kdl = r#"
            topology "bad-deps"
            unit "build" kind="cloud" resource="x" needs="nonexistent"
        "#;

        let result = parse(kdl);
        assert!(matches!(result.unwrap_err(), ConfigError::InvalidReference(_)));
    }

    #[test]
    fn test_detect_cycle() {
        let kdl = r#"
            topology "cyclic"
            unit "a" kind="cloud" resource="x" needs="b"
            unit "b" kind="cloud" resource="x" needs="a"
        "#;

        let err = parse(kdl).unwrap_err();
        match &err {
            ConfigError::Graph(stackplan_core::Error::CycleDetected { units }) => {
                let ids: Vec<&str> = units.iter().map(|u| u.as_str()).collect();
                assert_eq!(ids, vec!["a", "b"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
        assert_eq!(err.to_string(), "cycle detected in dependencies: a -> b -> a");
    }

    #[test]
    fn test_unresolved_env_reported_per_unit() {
        let kdl = r#"
            topology "keys"
            unit "addon" kind="helm" {
                chart "smartcheck"
                values {
                    apiKey "${env.SMART_CHECK_API_KEY}"
                    region "${env.AWS_REGION}"
                }
            }
            unit "net" kind="cloud" resource="vpc"
        "#;
        let env = HashMap::from([("AWS_REGION".to_string(), "us-east-1".to_string())]);
        let topology = parse_topology_with_env(kdl, &ContextOverrides::new(), env).unwrap();

        assert_eq!(
            topology.unresolved,
            vec![UnresolvedVariable {
                unit: UnitId::from("addon"),
                variable: "env.SMART_CHECK_API_KEY".to_string(),
            }]
        );
        let err = topology.require_resolved().unwrap_err();
        assert!(matches!(err, ConfigError::UnresolvedVariables(_)));
        assert!(err.to_string().contains("${env.SMART_CHECK_API_KEY} in unit 'addon'"));
    }

    #[test]
    fn test_fully_resolved_topology() {
        let topology = parse(
            r#"
            topology "plain"
            unit "net" kind="cloud" resource="vpc" {
                properties {
                    cidr "${context.cidr_prefix}.0.0/16"
                }
            }
            "#,
        )
        .unwrap();
        assert!(topology.unresolved.is_empty());
        topology.require_resolved().unwrap();
    }

    #[test]
    fn test_duplicate_unit() {
        let kdl = r#"
            topology "dup"
            unit "a" kind="cloud" resource="x"
            unit "a" kind="cloud" resource="y"
        "#;
        assert!(matches!(parse(kdl).unwrap_err(), ConfigError::Duplicate(_)));
    }

    #[test]
    fn test_secret_from_non_producer() {
        let kdl = r#"
            topology "nosecret"
            unit "a" kind="cloud" resource="x"
            unit "b" kind="cloud" resource="x" {
                uses-secret from="a"
            }
        "#;
        assert!(matches!(
            parse(kdl).unwrap_err(),
            ConfigError::Graph(stackplan_core::Error::SecretNotProduced { .. })
        ));
    }

    #[test]
    fn test_missing_fields() {
        assert!(matches!(
            parse(r#"unit "a" kind="cloud" resource="x""#).unwrap_err(),
            ConfigError::MissingField(_)
        ));
        assert!(matches!(
            parse("topology \"t\"\nunit \"a\" kind=\"helm\"").unwrap_err(),
            ConfigError::MissingField(_)
        ));
        assert!(matches!(
            parse("topology \"t\"\nunit \"a\" kind=\"manifest\"").unwrap_err(),
            ConfigError::MissingField(_)
        ));
        assert!(matches!(
            parse("topology \"t\"\nunit \"a\" kind=\"lambda\"").unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_env_and_vars_interpolation() {
        let kdl = r#"
            topology "interp"

            vars {
                release_prefix "sec"
            }

            unit "addon" kind="helm" {
                chart "smartcheck"
                release "${vars.release_prefix}-addon"
                values {
                    cloudOne {
                        apiKey "${env.CLOUD_ONE_API_KEY}"
                    }
                }
            }
        "#;
        let env = HashMap::from([("CLOUD_ONE_API_KEY".to_string(), "k-123".to_string())]);
        let topology = parse_topology_with_env(kdl, &ContextOverrides::new(), env).unwrap();
        match &topology.graph.unit("addon").unwrap().payload {
            UnitPayload::Helm(release) => {
                assert_eq!(release.values["cloudOne"]["apiKey"], "k-123");
                assert_eq!(release.release.as_deref(), Some("sec-addon"));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
