//! dagflow runs workflow graphs whose nodes are model calls.
//!
//! A [`Graph`] is loaded or built up front and validated as a whole; the
//! [`GraphExecutor`] then drives every node to a terminal state. A node runs
//! once all of its dependencies have succeeded, its output is checked against
//! its schema, and independent branches run concurrently.
//!
//! ```no_run
//! use std::sync::Arc;
//! use dagflow::{EngineConfig, Graph, GraphExecutor, ModelClient};
//!
//! # async fn run(client: Arc<dyn ModelClient>) -> dagflow::Result<()> {
//! let graph = Graph::load(std::path::Path::new("workflow.toml"))?;
//! let executor = GraphExecutor::new(client, EngineConfig::default());
//! let report = executor.execute(&graph).await?;
//! for node in report.nodes.values() {
//!     if let Some(failure) = &node.failure {
//!         eprintln!("{}: {}", node.node_id, failure);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub use dagflow_core::{
    BackoffStrategy, EngineConfig, EventBus, FailurePolicy, FlowError, ModelClient, ModelError,
    ModelRequest, NodeId, NodeState, Result, RetryConfig, RunEvent, RunId,
};
pub use dagflow_engine::{
    validate, GraphExecutor, Graph, Node, NodeFailure, NodeReport, RunReport, ValidationIssue,
    ValidationResult,
};
