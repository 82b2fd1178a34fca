pub mod executor;
pub mod gate;
pub mod graph;
pub mod repair;
pub mod report;
pub mod retry;
pub mod state;
pub mod template;
pub mod validator;

pub use executor::GraphExecutor;
pub use gate::{Arrival, JoinGate};
pub use graph::{Graph, Node};
pub use report::{NodeFailure, NodeReport, RunReport};
pub use retry::{call_with_retry, calculate_backoff, CallOutcome, RetryOutcome};
pub use state::{Completion, NodeRecord, StateTable};
pub use validator::{validate, ValidationIssue, ValidationResult};
