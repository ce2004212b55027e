//! The check tree: how verification steps compose.
//!
//! A document decodes into a [`CheckNode`]. Each entry is a mapping with exactly
//! one of `run`, `serial`, or `parallel`, or a bare sequence (serial). The top
//! level of a document is a sequence and therefore serial.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::ConfigError;

/// One external command to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunStep {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub command: String,
}

/// Node of the check tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckNode {
    Run(RunStep),
    /// Children run in order; the first failure stops the group.
    Serial(Vec<CheckNode>),
    /// Children run concurrently and all run to completion.
    Parallel(Vec<CheckNode>),
}

impl CheckNode {
    /// Leaf steps in declaration order (depth-first).
    pub fn steps(&self) -> Vec<&RunStep> {
        let mut steps = Vec::new();
        self.collect_steps(&mut steps);
        steps
    }

    fn collect_steps<'a>(&'a self, out: &mut Vec<&'a RunStep>) {
        match self {
            CheckNode::Run(step) => out.push(step),
            CheckNode::Serial(children) | CheckNode::Parallel(children) => {
                for child in children {
                    child.collect_steps(out);
                }
            }
        }
    }
}

const RUN: &str = "run";
const SERIAL: &str = "serial";
const PARALLEL: &str = "parallel";

/// Decode a parsed document into a check tree.
///
/// An empty document is an empty serial group.
pub fn decode_document(document: &Value) -> Result<CheckNode, ConfigError> {
    match document {
        Value::Null => Ok(CheckNode::Serial(Vec::new())),
        other => decode_node(other, ""),
    }
}

fn decode_node(value: &Value, location: &str) -> Result<CheckNode, ConfigError> {
    match value {
        Value::Sequence(items) => Ok(CheckNode::Serial(decode_children(items, location)?)),
        Value::Mapping(mapping) => decode_mapping(mapping, location),
        other => Err(invalid(
            location,
            format!("expected a mapping or a sequence, found {}", kind(other)),
        )),
    }
}

fn decode_mapping(mapping: &Mapping, location: &str) -> Result<CheckNode, ConfigError> {
    let mut keys = Vec::with_capacity(mapping.len());
    for key in mapping.keys() {
        match key.as_str() {
            Some(name @ (RUN | SERIAL | PARALLEL)) => keys.push(name),
            Some(name) => return Err(invalid(location, format!("unknown key '{name}'"))),
            None => return Err(invalid(location, "keys must be strings".to_string())),
        }
    }
    let key = match keys.as_slice() {
        [key] => *key,
        [] => {
            return Err(invalid(
                location,
                "expected one of 'run', 'serial', 'parallel'".to_string(),
            ));
        }
        _ => {
            return Err(invalid(
                location,
                format!(
                    "expected exactly one of 'run', 'serial', 'parallel', found {}",
                    keys.join(", ")
                ),
            ));
        }
    };
    let body = &mapping[key];
    let here = child_location(location, key);
    match key {
        RUN => decode_run(body, &here),
        SERIAL => Ok(CheckNode::Serial(decode_group(body, &here)?)),
        _ => Ok(CheckNode::Parallel(decode_group(body, &here)?)),
    }
}

fn decode_group(value: &Value, location: &str) -> Result<Vec<CheckNode>, ConfigError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Sequence(items) => decode_children(items, location),
        other => Err(invalid(
            location,
            format!("expected a sequence of checks, found {}", kind(other)),
        )),
    }
}

fn decode_children(items: &[Value], location: &str) -> Result<Vec<CheckNode>, ConfigError> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| decode_node(item, &format!("{location}[{index}]")))
        .collect()
}

fn decode_run(value: &Value, location: &str) -> Result<CheckNode, ConfigError> {
    let step: RunStep = serde_yaml::from_value(value.clone())
        .map_err(|err| invalid(location, err.to_string()))?;
    if step.command.trim().is_empty() {
        return Err(invalid(location, "command must not be empty".to_string()));
    }
    Ok(CheckNode::Run(step))
}

fn child_location(location: &str, key: &str) -> String {
    if location.is_empty() {
        key.to_string()
    } else {
        format!("{location}.{key}")
    }
}

fn invalid(location: &str, reason: String) -> ConfigError {
    let location = if location.is_empty() {
        "<root>".to_string()
    } else {
        location.to_string()
    };
    ConfigError::InvalidNode { location, reason }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
