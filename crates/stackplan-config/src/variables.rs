//! Variable interpolation for topology payloads.
//!
//! Supports variables like:
//! - `${context.cidr_prefix}` - Any resolved context parameter
//! - `${env.VAR_NAME}` - Environment variable
//! - `${vars.NAME}` - Variable from the topology's `vars` block
//! - `${topology.name}` - Topology name
//!
//! A string made of a single placeholder is replaced by the variable's typed
//! value, so `"${context.desired_capacity}"` renders as the number `2`.
//! Unknown variables are left in place; `placeholders` finds them afterwards.

use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;
use tracing::debug;

use crate::StackContext;

/// Variables available while rendering a topology.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    /// Resolved context parameters
    pub context: BTreeMap<String, Value>,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Variables declared in the topology file
    pub vars: HashMap<String, String>,
    /// Topology name
    pub topology: String,
}

// Regex for matching ${...} variables
static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}").unwrap()
});

impl VariableContext {
    /// Create a context exposing the given stack context.
    pub fn new(ctx: &StackContext) -> Self {
        Self {
            context: ctx.variables(),
            ..Default::default()
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Resolve a variable name to its value.
    pub fn resolve(&self, var_name: &str) -> Option<Value> {
        let parts: Vec<&str> = var_name.split('.').collect();

        match parts.as_slice() {
            ["context", name] => self.context.get(*name).cloned(),
            ["env", name] => self.env.get(*name).cloned().map(Value::from),
            ["vars", name] => self.vars.get(*name).cloned().map(Value::from),
            ["topology", "name"] => Some(Value::from(self.topology.clone())),
            _ => None,
        }
    }

    /// Interpolate all variables in a string.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let var_name = &caps[1];
                match self.resolve(var_name) {
                    Some(value) => render(&value),
                    None => {
                        debug!(variable = %var_name, "Unresolved variable left in place");
                        format!("${{{}}}", var_name)
                    }
                }
            })
            .to_string()
    }

    /// Interpolate every string inside a JSON value.
    pub fn interpolate_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => self.interpolate_scalar(s),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.interpolate_value(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.interpolate_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// A lone placeholder keeps the variable's type; anything else is text.
    fn interpolate_scalar(&self, input: &str) -> Value {
        if let Some(caps) = VAR_REGEX.captures(input) {
            if caps.get(0).map(|m| m.as_str()) == Some(input) {
                if let Some(value) = self.resolve(&caps[1]) {
                    return value;
                }
            }
        }
        Value::String(self.interpolate(input))
    }
}

/// Every `${...}` placeholder still present in a value, in document order.
pub fn placeholders(value: &Value) -> Vec<String> {
    let mut found = Vec::new();
    collect_placeholders(value, &mut found);
    found
}

fn collect_placeholders(value: &Value, found: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            for caps in VAR_REGEX.captures_iter(s) {
                let name = caps[1].to_string();
                if !found.contains(&name) {
                    found.push(name);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_placeholders(v, found)),
        Value::Object(map) => map.values().for_each(|v| collect_placeholders(v, found)),
        _ => {}
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> VariableContext {
        VariableContext::new(&StackContext::default())
    }

    #[test]
    fn test_context_interpolation() {
        let ctx = vars();
        assert_eq!(ctx.interpolate("${context.cidr_prefix}.0.0/16"), "10.0.0.0/16");
        assert_eq!(ctx.interpolate("${context.cluster_name}-sa"), "container-security-sample-sa");
    }

    #[test]
    fn test_env_variables() {
        let ctx = vars().with_env("AWS_REGION", "ap-northeast-1");
        assert_eq!(ctx.interpolate("region=${env.AWS_REGION}"), "region=ap-northeast-1");
    }

    #[test]
    fn test_unknown_variable_preserved() {
        let ctx = vars();
        assert_eq!(ctx.interpolate("${env.MISSING} ${unknown}"), "${env.MISSING} ${unknown}");
    }

    #[test]
    fn test_lone_placeholder_keeps_type() {
        let ctx = vars();
        assert_eq!(ctx.interpolate_value(&json!("${context.desired_capacity}")), json!(2));
        assert_eq!(
            ctx.interpolate_value(&json!("nodes: ${context.desired_capacity}")),
            json!("nodes: 2")
        );
    }

    #[test]
    fn test_interpolate_nested_value() {
        let ctx = vars().with_var("team", "platform");
        let input = json!({
            "metadata": {"labels": {"team": "${vars.team}"}},
            "subnets": [{"cidr": "${context.cidr_prefix}.2.0/24"}],
            "replicas": 3,
        });
        let output = ctx.interpolate_value(&input);
        assert_eq!(output["metadata"]["labels"]["team"], "platform");
        assert_eq!(output["subnets"][0]["cidr"], "10.0.2.0/24");
        assert_eq!(output["replicas"], 3);
    }

    #[test]
    fn test_placeholders_left_after_interpolation() {
        let ctx = vars().with_env("AWS_REGION", "us-east-1");
        let rendered = ctx.interpolate_value(&json!({
            "env": {"AWS_REGION": "${env.AWS_REGION}"},
            "cloudOne": {"apiKey": "${env.CLOUD_ONE_API_KEY}"},
            "images": ["${env.RDS_INITIALIZER_IMAGE}", "repo/${env.RDS_INITIALIZER_IMAGE}"],
        }));
        let mut left = placeholders(&rendered);
        left.sort();
        assert_eq!(left, vec!["env.CLOUD_ONE_API_KEY", "env.RDS_INITIALIZER_IMAGE"]);
    }

    #[test]
    fn test_time_variables_not_supported() {
        let ctx = vars();
        assert_eq!(ctx.resolve("timestamp"), None);
        assert_eq!(ctx.interpolate("${date}"), "${date}");
    }

    #[test]
    fn test_nested_braces() {
        let ctx = vars();
        assert_eq!(
            ctx.interpolate("{{${context.node_instance_type}}}"),
            "{{m5.large}}"
        );
    }
}
