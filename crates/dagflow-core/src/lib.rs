pub mod config;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::{BackoffStrategy, EngineConfig, FailurePolicy, RetryConfig};
pub use error::{FlowError, ModelError, Result};
pub use event::{EventBus, RunEvent};
pub use traits::{ModelClient, ModelRequest};
pub use types::*;
