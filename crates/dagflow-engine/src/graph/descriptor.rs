//! Loading a graph from a definition document.
//!
//! The document is a map of node id to node descriptor, in JSON or TOML:
//!
//! ```toml
//! [research]
//! prompt_template = "List facts about {{ topic }}"
//! input = { topic = "tides" }
//! output_schema = { type = "object", required = ["facts"] }
//! next_nodes = ["write"]
//!
//! [write]
//! prompt_template = "Write a paragraph from {{ research.facts }}"
//! dependencies = ["research"]
//! ```
//!
//! Every structural problem (bad descriptor, dangling reference, cycle)
//! is reported here, before anything runs.

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use dagflow_core::error::{FlowError, Result};

use super::{Graph, Node};

impl Graph {
    /// Build and validate a graph from a JSON value.
    pub fn from_value(definition: Value) -> Result<Self> {
        let Value::Object(entries) = definition else {
            return Err(FlowError::MalformedNode {
                node: String::new(),
                message: "graph definition must be a map of node id to descriptor".to_string(),
            });
        };

        let mut graph = Graph::new();
        for (key, descriptor) in entries {
            graph.add_node(parse_descriptor(key, descriptor)?)?;
        }
        graph.validate()?;

        debug!(nodes = graph.len(), "Loaded graph definition");
        Ok(graph)
    }

    /// Build and validate a graph from JSON text.
    pub fn from_json_str(content: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(content)?)
    }

    /// Build and validate a graph from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let table: toml::Value = toml::from_str(content)?;
        Self::from_value(serde_json::to_value(table)?)
    }

    /// Load a graph definition file. `.toml` files are parsed as TOML,
    /// everything else as JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            _ => Self::from_json_str(&content),
        }
    }
}

fn parse_descriptor(key: String, descriptor: Value) -> Result<Node> {
    let malformed = |message: String| FlowError::MalformedNode {
        node: key.clone(),
        message,
    };

    let Value::Object(mut fields) = descriptor else {
        return Err(malformed("descriptor must be an object".to_string()));
    };

    match fields.get("id") {
        None => {
            fields.insert("id".to_string(), Value::String(key.clone()));
        }
        Some(Value::String(id)) if *id == key => {}
        Some(Value::String(id)) => {
            return Err(malformed(format!("descriptor id '{}' does not match its key", id)));
        }
        Some(_) => return Err(malformed("id must be a string".to_string())),
    }

    serde_json::from_value(Value::Object(fields)).map_err(|e| malformed(e.to_string()))
}
