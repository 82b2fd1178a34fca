use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use dagflow_core::config::{BackoffStrategy, RetryConfig};
use dagflow_core::error::ModelError;
use dagflow_core::traits::{ModelClient, ModelRequest};

/// Tagged result of a single model call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Success(Value),
    Transient(ModelError),
    Fatal(ModelError),
}

impl From<Result<Value, ModelError>> for CallOutcome {
    fn from(result: Result<Value, ModelError>) -> Self {
        match result {
            Ok(value) => CallOutcome::Success(value),
            Err(e) if e.is_retryable() => CallOutcome::Transient(e),
            Err(e) => CallOutcome::Fatal(e),
        }
    }
}

/// Final result of the retry loop for one node.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    /// The model returned output (not yet validated).
    Succeeded { output: Value, attempts: u32 },
    /// Every attempt failed transiently; `error` is the last one.
    Exhausted { error: ModelError, attempts: u32 },
    /// A non-retryable failure ended the loop.
    Fatal { error: ModelError, attempts: u32 },
    /// The run was cancelled while calling or backing off.
    Cancelled { attempts: u32 },
}

impl RetryOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts, .. }
            | RetryOutcome::Exhausted { attempts, .. }
            | RetryOutcome::Fatal { attempts, .. }
            | RetryOutcome::Cancelled { attempts } => *attempts,
        }
    }
}

/// Delay before retry number `attempt` (0-based).
pub fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = match config.backoff {
        BackoffStrategy::Fixed => config.initial_backoff_ms,
        BackoffStrategy::Exponential => config
            .initial_backoff_ms
            .saturating_mul(2u64.saturating_pow(attempt)),
    }
    .min(config.max_backoff_ms);

    if !config.jitter {
        return Duration::from_millis(ms);
    }
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

/// Call the model, retrying transient failures up to `config.max_retries` times.
///
/// `request.attempt` is overwritten with the 1-based attempt number on each
/// call. `on_retry` runs before each backoff sleep with the attempt that just
/// failed, the delay, and the error.
pub async fn call_with_retry<F>(
    client: &dyn ModelClient,
    mut request: ModelRequest,
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut on_retry: F,
) -> RetryOutcome
where
    F: FnMut(u32, Duration, &ModelError),
{
    let max_retries = config.max_retries;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        request.attempt = attempt;

        let result = tokio::select! {
            result = client.call(request.clone()) => result,
            _ = cancel.cancelled() => {
                return RetryOutcome::Cancelled { attempts: attempt };
            }
        };

        match CallOutcome::from(result) {
            CallOutcome::Success(output) => {
                debug!(node_id = %request.node_id, attempt, "Model call succeeded");
                return RetryOutcome::Succeeded {
                    output,
                    attempts: attempt,
                };
            }
            CallOutcome::Fatal(error) => {
                warn!(node_id = %request.node_id, attempt, error = %error, "Model call failed fatally");
                return RetryOutcome::Fatal {
                    error,
                    attempts: attempt,
                };
            }
            CallOutcome::Transient(error) if attempt <= max_retries => {
                let backoff = calculate_backoff(attempt - 1, config);
                warn!(
                    node_id = %request.node_id,
                    attempt,
                    max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %error,
                    "Retrying model call"
                );
                on_retry(attempt, backoff, &error);

                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => {
                        return RetryOutcome::Cancelled { attempts: attempt };
                    }
                }
            }
            CallOutcome::Transient(error) => {
                warn!(
                    node_id = %request.node_id,
                    attempts = attempt,
                    error = %error,
                    "Retry budget exhausted"
                );
                return RetryOutcome::Exhausted {
                    error,
                    attempts: attempt,
                };
            }
        }
    }
}
