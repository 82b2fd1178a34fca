use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use dagflow_core::error::Result;
use dagflow_core::types::{NodeState, RunId};

use crate::validator::ValidationIssue;

/// Why a node ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeFailure {
    /// Output did not satisfy the schema. Never retried.
    Validation { issues: Vec<ValidationIssue> },
    /// Transient model failures used up the retry budget.
    Transient { message: String },
    /// The model call failed in a non-retryable way.
    Fatal { message: String },
    /// The run was aborted while this node was running.
    Cancelled,
}

impl std::fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeFailure::Validation { issues } => {
                let joined = issues
                    .iter()
                    .map(|i| i.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                write!(f, "validation failed: {}", joined)
            }
            NodeFailure::Transient { message } => {
                write!(f, "retries exhausted: {}", message)
            }
            NodeFailure::Fatal { message } => write!(f, "fatal: {}", message),
            NodeFailure::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Final outcome of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeReport {
    pub node_id: String,
    pub state: NodeState,
    /// Validated output, present only when `state` is `Succeeded`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Failure detail, present only when `state` is `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<NodeFailure>,
    /// Model calls made, including the first.
    pub attempts: u32,
    /// Attempts beyond the first.
    #[serde(default)]
    pub retries: u32,
    /// Failed or blocked direct dependencies, present when `state` is `Blocked`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<String>,
    /// Time spent running (0 for nodes that never ran).
    pub elapsed_ms: u64,
}

/// Audit record of a whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub nodes: BTreeMap<String, NodeReport>,
}

impl RunReport {
    pub fn node(&self, id: &str) -> Option<&NodeReport> {
        self.nodes.get(id)
    }

    pub fn state_of(&self, id: &str) -> Option<NodeState> {
        self.nodes.get(id).map(|n| n.state)
    }

    /// Validated output of a succeeded node.
    pub fn output(&self, id: &str) -> Option<&Value> {
        self.nodes.get(id).and_then(|n| n.output.as_ref())
    }

    /// Whether every node succeeded.
    pub fn is_success(&self) -> bool {
        self.nodes.values().all(|n| n.state == NodeState::Succeeded)
    }

    /// Ids of nodes in `state`, ordered.
    pub fn ids_in_state(&self, state: NodeState) -> Vec<&str> {
        self.nodes
            .values()
            .filter(|n| n.state == state)
            .map(|n| n.node_id.as_str())
            .collect()
    }

    pub fn succeeded(&self) -> Vec<&str> {
        self.ids_in_state(NodeState::Succeeded)
    }

    pub fn failed(&self) -> Vec<&str> {
        self.ids_in_state(NodeState::Failed)
    }

    pub fn blocked(&self) -> Vec<&str> {
        self.ids_in_state(NodeState::Blocked)
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.ids_in_state(NodeState::Skipped)
    }

    /// Total model calls across the run.
    pub fn total_attempts(&self) -> u32 {
        self.nodes.values().map(|n| n.attempts).sum()
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn report(state: NodeState, attempts: u32) -> NodeReport {
        NodeReport {
            node_id: String::new(),
            state,
            output: None,
            failure: None,
            attempts,
            retries: attempts.saturating_sub(1),
            blocked_by: vec![],
            elapsed_ms: 0,
        }
    }

    fn run(nodes: Vec<(&str, NodeReport)>) -> RunReport {
        RunReport {
            run_id: RunId::new(),
            started_at: Utc::now(),
            elapsed_ms: 5,
            nodes: nodes
                .into_iter()
                .map(|(id, mut n)| {
                    n.node_id = id.to_string();
                    (id.to_string(), n)
                })
                .collect(),
        }
    }

    #[test]
    fn test_retries_serialized() {
        let r = run(vec![
            ("a", report(NodeState::Succeeded, 3)),
            ("b", report(NodeState::Blocked, 0)),
        ]);
        let value = serde_json::to_value(&r).unwrap();
        assert_eq!(value["nodes"]["a"]["retries"], json!(2));
        assert_eq!(value["nodes"]["a"]["attempts"], json!(3));
        assert_eq!(value["nodes"]["b"]["retries"], json!(0));

        let back: RunReport = serde_json::from_value(value).unwrap();
        assert_eq!(back.node("a").unwrap().retries, 2);
    }

    #[test]
    fn test_state_queries() {
        let r = run(vec![
            ("a", report(NodeState::Succeeded, 1)),
            ("b", report(NodeState::Failed, 3)),
            ("c", report(NodeState::Blocked, 0)),
        ]);
        assert!(!r.is_success());
        assert_eq!(r.succeeded(), vec!["a"]);
        assert_eq!(r.failed(), vec!["b"]);
        assert_eq!(r.blocked(), vec!["c"]);
        assert!(r.skipped().is_empty());
        assert_eq!(r.total_attempts(), 4);
        assert_eq!(r.state_of("b"), Some(NodeState::Failed));
        assert_eq!(r.state_of("zzz"), None);
    }

    #[test]
    fn test_failure_serialization() {
        let failure = NodeFailure::Validation {
            issues: vec![ValidationIssue {
                path: "$.a".into(),
                message: "required property is missing".into(),
            }],
        };
        let value = serde_json::to_value(&failure).unwrap();
        assert_eq!(value["kind"], json!("validation"));
        assert_eq!(value["issues"][0]["path"], json!("$.a"));
        assert_eq!(
            failure.to_string(),
            "validation failed: $.a: required property is missing"
        );

        let value = serde_json::to_value(NodeFailure::Cancelled).unwrap();
        assert_eq!(value, json!({"kind": "cancelled"}));
    }

    #[test]
    fn test_report_json_omits_empty_fields() {
        let mut ok = report(NodeState::Succeeded, 1);
        ok.output = Some(json!({"x": 1}));
        let r = run(vec![("a", ok)]);
        let text = r.to_json_pretty().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        let node = &value["nodes"]["a"];
        assert_eq!(node["state"], json!("succeeded"));
        assert_eq!(node["output"], json!({"x": 1}));
        assert!(node.get("failure").is_none());
        assert!(node.get("blocked_by").is_none());
    }
}
