//! Conversion of KDL payload blocks into JSON values.
//!
//! - A node with children becomes the value of its children block.
//! - A children block whose nodes are all named `-` becomes an array,
//!   otherwise an object keyed by node name.
//! - A leaf node with properties becomes an object of those properties.
//! - A leaf node with one argument becomes that scalar, several arguments
//!   an array, none `null`.

use kdl::{KdlDocument, KdlNode, KdlValue};
use serde_json::{Map, Value};

use crate::{ConfigError, ConfigResult};

const ITEM: &str = "-";

/// Convert a whole children block.
pub fn document_to_value(doc: &KdlDocument) -> ConfigResult<Value> {
    let nodes = doc.nodes();
    if !nodes.is_empty() && nodes.iter().all(|n| n.name().value() == ITEM) {
        return nodes
            .iter()
            .map(node_to_value)
            .collect::<ConfigResult<Vec<_>>>()
            .map(Value::Array);
    }

    let mut map = Map::new();
    for node in nodes {
        let key = node.name().value();
        if key == ITEM {
            return Err(ConfigError::invalid(
                "block",
                "cannot mix '-' items with named entries",
            ));
        }
        if map.insert(key.to_string(), node_to_value(node)?).is_some() {
            return Err(ConfigError::Duplicate(format!("key '{key}'")));
        }
    }
    Ok(Value::Object(map))
}

/// Convert a single node to the value it carries.
pub fn node_to_value(node: &KdlNode) -> ConfigResult<Value> {
    let name = node.name().value();
    let args: Vec<Value> = node
        .entries()
        .iter()
        .filter(|e| e.name().is_none())
        .map(|e| scalar(e.value()))
        .collect();
    let props: Vec<(String, Value)> = node
        .entries()
        .iter()
        .filter_map(|e| e.name().map(|n| (n.value().to_string(), scalar(e.value()))))
        .collect();

    if let Some(children) = node.children() {
        if !args.is_empty() || !props.is_empty() {
            return Err(ConfigError::invalid(
                name,
                "a node with a children block cannot also carry values",
            ));
        }
        return document_to_value(children);
    }

    match (args.len(), props.is_empty()) {
        (0, false) => Ok(Value::Object(props.into_iter().collect())),
        (0, true) => Ok(Value::Null),
        (_, false) => Err(ConfigError::invalid(
            name,
            "mixing arguments and properties is ambiguous",
        )),
        (1, true) => Ok(args.into_iter().next().unwrap_or(Value::Null)),
        (_, true) => Ok(Value::Array(args)),
    }
}

/// Convert a KDL scalar.
pub fn scalar(value: &KdlValue) -> Value {
    if let Some(s) = value.as_string() {
        Value::from(s)
    } else if let Some(i) = value.as_integer() {
        i64::try_from(i)
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(i.to_string()))
    } else if let Some(f) = value.as_float() {
        serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    } else if let Some(b) = value.as_bool() {
        Value::Bool(b)
    } else {
        Value::Null
    }
}
