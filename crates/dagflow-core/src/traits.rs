use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// A single generative call issued on behalf of one node attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// The node this call belongs to.
    pub node_id: String,
    /// Rendered prompt text.
    pub prompt: String,
    /// Effective input: the node's static input merged with upstream results.
    pub input: serde_json::Map<String, serde_json::Value>,
    /// Schema the output will be validated against.
    pub output_schema: serde_json::Value,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// The transport that performs the actual generative call.
///
/// Implementations return structured output or a [`ModelError`] that tells the
/// executor whether the failure may be retried.
pub trait ModelClient: Send + Sync + 'static {
    fn call(&self, request: ModelRequest) -> BoxFuture<'_, Result<serde_json::Value, ModelError>>;
}
