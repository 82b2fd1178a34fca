use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    /// What to do with independent branches once a node fails.
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Upper bound on simultaneously running model calls (None = unbounded).
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    /// Try to parse JSON out of plain-text model output before validating.
    #[serde(default = "default_repair_text_output")]
    pub repair_text_output: bool,
    /// Capacity of the run event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            failure_policy: FailurePolicy::default(),
            max_concurrency: None,
            repair_text_output: default_repair_text_output(),
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_repair_text_output() -> bool { true }
fn default_event_capacity() -> usize { 256 }

/// Behaviour of the run after the first node failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Only dependents of the failed node are blocked; unrelated branches finish.
    #[default]
    Continue,
    /// Cancel all in-flight and pending work on the first failure.
    AbortAll,
}

/// Shape of the delay between retry attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Always wait `initial_backoff_ms`.
    Fixed,
    /// Double the wait on every attempt, capped at `max_backoff_ms`.
    #[default]
    Exponential,
}

/// Retry configuration for model calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt. Total attempts = `max_retries + 1`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub backoff: BackoffStrategy,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    /// Scale each delay by a random factor in 0.8x..1.2x.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff: BackoffStrategy::default(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_retries() -> u32 { 2 }
fn default_initial_backoff() -> u64 { 500 }
fn default_max_backoff() -> u64 { 30000 }
fn default_jitter() -> bool { true }

impl RetryConfig {
    /// A copy of this config with a different retry budget.
    pub fn with_max_retries(&self, max_retries: u32) -> Self {
        Self {
            max_retries,
            ..self.clone()
        }
    }
}

impl EngineConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| FlowError::ConfigNotFound(path.display().to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse config from TOML text, expanding `${ENV_VAR}` references.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self =
            toml::from_str(&expanded).map_err(|e| FlowError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with. Called by the loaders and
    /// again by the executor before each run, so configs built in code are
    /// covered too.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == Some(0) {
            return Err(FlowError::Config(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(FlowError::Config(format!(
                "retry.initial_backoff_ms ({}) exceeds retry.max_backoff_ms ({})",
                self.retry.initial_backoff_ms, self.retry.max_backoff_ms
            )));
        }
        if self.event_capacity == 0 {
            return Err(FlowError::Config(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Substitute `${NAME}` with the value of environment variable `NAME`.
///
/// Unset variables, and a `${` with no closing brace, are copied through
/// untouched.
fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(len) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..len];
        match std::env::var(name) {
            Ok(value) => out.push_str(&value),
            Err(_) => out.push_str(&rest[start..start + len + 3]),
        }
        rest = &after[len + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_DAGFLOW_VAR", "7");
        let result = expand_env_vars("max_retries = ${TEST_DAGFLOW_VAR}");
        assert_eq!(result, "max_retries = 7");
        std::env::remove_var("TEST_DAGFLOW_VAR");
    }

    #[test]
    fn test_expand_env_vars_unterminated() {
        assert_eq!(expand_env_vars("a = \"${OPEN\""), "a = \"${OPEN\"");
        assert_eq!(expand_env_vars("cost = $5"), "cost = $5");
    }

    #[test]
    fn test_validate_rejects_unrunnable_values() {
        assert!(EngineConfig::default().validate().is_ok());

        let zero_concurrency = EngineConfig {
            max_concurrency: Some(0),
            ..EngineConfig::default()
        };
        assert!(matches!(zero_concurrency.validate(), Err(FlowError::Config(_))));

        let zero_capacity = EngineConfig {
            event_capacity: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(zero_capacity.validate(), Err(FlowError::Config(_))));
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_DAGFLOW_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_DAGFLOW_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.backoff, BackoffStrategy::Exponential);
        assert_eq!(config.retry.initial_backoff_ms, 500);
        assert_eq!(config.retry.max_backoff_ms, 30000);
        assert!(config.retry.jitter);
        assert_eq!(config.failure_policy, FailurePolicy::Continue);
        assert!(config.max_concurrency.is_none());
        assert!(config.repair_text_output);
    }

    #[test]
    fn test_full_toml() {
        let toml_str = r#"
failure_policy = "abort_all"
max_concurrency = 4
repair_text_output = false

[retry]
max_retries = 5
backoff = "fixed"
initial_backoff_ms = 100
max_backoff_ms = 100
jitter = false
"#;
        let config = EngineConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.failure_policy, FailurePolicy::AbortAll);
        assert_eq!(config.max_concurrency, Some(4));
        assert!(!config.repair_text_output);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.backoff, BackoffStrategy::Fixed);
        assert!(!config.retry.jitter);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = EngineConfig::from_toml_str("max_concurrency = 0").unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));
    }

    #[test]
    fn test_inverted_backoff_rejected() {
        let toml_str = r#"
[retry]
initial_backoff_ms = 5000
max_backoff_ms = 10
"#;
        assert!(EngineConfig::from_toml_str(toml_str).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = EngineConfig::load(Path::new("/nonexistent/dagflow.toml")).unwrap_err();
        assert!(matches!(err, FlowError::ConfigNotFound(_)));
    }

    #[test]
    fn test_with_max_retries() {
        let config = RetryConfig::default().with_max_retries(7);
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.initial_backoff_ms, 500);
    }
}
