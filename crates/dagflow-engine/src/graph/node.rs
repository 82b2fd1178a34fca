use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::template;

/// A node in the workflow graph.
///
/// Each node is one generative call: its prompt is rendered from
/// `prompt_template` and the effective input, and the model's output must
/// satisfy `output_schema` before dependents may run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier for this node.
    pub id: String,
    /// Static payload for this node's call.
    #[serde(default)]
    pub input: Map<String, Value>,
    /// Instructions for the model; `{{ key }}` placeholders read from the input.
    #[serde(default, alias = "promptTemplate")]
    pub prompt_template: String,
    /// JSON-Schema-like descriptor the output must satisfy.
    #[serde(default = "default_output_schema", alias = "outputSchema")]
    pub output_schema: Value,
    /// Nodes that must succeed before this one may start.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Nodes to trigger once this one succeeds.
    #[serde(default, alias = "nextNodes")]
    pub next_nodes: Vec<String>,
    /// Retry budget override for this node.
    #[serde(default, alias = "maxRetries")]
    pub max_retries: Option<u32>,
}

fn default_output_schema() -> Value {
    Value::Object(Map::new())
}

impl Node {
    /// Create a new node with minimal configuration.
    pub fn new(id: impl Into<String>, prompt_template: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            input: Map::new(),
            prompt_template: prompt_template.into(),
            output_schema: default_output_schema(),
            dependencies: vec![],
            next_nodes: vec![],
            max_retries: None,
        }
    }

    /// Add one static input value.
    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.input.insert(key.into(), value);
        self
    }

    /// Set the output schema.
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.output_schema = schema;
        self
    }

    /// Set the dependencies.
    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Set the next nodes.
    pub fn then<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.next_nodes = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Override the retry budget.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Merge the static input with upstream results.
    ///
    /// Each upstream result is inserted under the upstream node's id, in the
    /// order given. A static input key with the same name wins.
    pub fn effective_input<'a, I>(&self, upstream: I) -> Map<String, Value>
    where
        I: IntoIterator<Item = (&'a str, &'a Value)>,
    {
        let mut merged = self.input.clone();
        for (id, value) in upstream {
            if !merged.contains_key(id) {
                merged.insert(id.to_string(), value.clone());
            }
        }
        merged
    }

    /// Render the prompt for this node against an effective input.
    pub fn render_prompt(&self, input: &Map<String, Value>) -> String {
        template::render(&self.prompt_template, input)
    }
}
