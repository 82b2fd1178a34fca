use thiserror::Error;

use crate::types::NodeState;

#[derive(Debug, Error)]
pub enum FlowError {
    // Structural errors, raised before any node runs
    #[error("Duplicate node id: {0}")]
    DuplicateId(String),

    #[error("Node '{node}' references unknown node '{reference}' in {field}")]
    DanglingReference {
        node: String,
        reference: String,
        field: String,
    },

    #[error("Cycle detected involving node: {0}")]
    CycleDetected(String),

    #[error("Malformed node descriptor '{node}': {message}")]
    MalformedNode { node: String, message: String },

    #[error("Node not found: {0}")]
    UnknownNode(String),

    // Lifecycle errors
    #[error("Illegal state transition for node {node}: {from} -> {to}")]
    IllegalTransition {
        node: String,
        from: NodeState,
        to: NodeState,
    },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl FlowError {
    /// Whether this error is a load-time / structural problem with the graph.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            FlowError::DuplicateId(_)
                | FlowError::DanglingReference { .. }
                | FlowError::CycleDetected(_)
                | FlowError::MalformedNode { .. }
                | FlowError::UnknownNode(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;

/// Failure reported by a [`ModelClient`](crate::traits::ModelClient) call.
///
/// The executor only cares about the distinction between the two kinds:
/// transient failures are retried within the node's budget, fatal ones are not.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// Rate limiting, timeouts, dropped connections.
    #[error("Transient model error: {0}")]
    Transient(String),

    /// Malformed request, auth failure, unsupported model.
    #[error("Fatal model error: {0}")]
    Fatal(String),
}

impl ModelError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ModelError::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            ModelError::Transient(m) | ModelError::Fatal(m) => m,
        }
    }
}
