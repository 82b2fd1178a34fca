use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;

use dagflow_core::error::ModelError;
use dagflow_core::traits::{ModelClient, ModelRequest};

/// One scripted response.
#[derive(Debug, Clone)]
pub enum Step {
    Output(Value),
    Transient(String),
    Fatal(String),
}

impl Step {
    fn into_result(self) -> Result<Value, ModelError> {
        match self {
            Step::Output(v) => Ok(v),
            Step::Transient(m) => Err(ModelError::Transient(m)),
            Step::Fatal(m) => Err(ModelError::Fatal(m)),
        }
    }
}

/// Call boundaries recorded in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    Started { node_id: String, attempt: u32 },
    Finished { node_id: String, attempt: u32 },
}

#[derive(Default)]
struct Script {
    steps: VecDeque<Step>,
    repeat_last: bool,
    delay: Option<Duration>,
}

/// A `ModelClient` whose responses are scripted per node id.
///
/// Unscripted nodes (or nodes whose script ran out) return the default
/// output, `{}` unless changed with [`ScriptedClient::with_default_output`].
pub struct ScriptedClient {
    scripts: Mutex<HashMap<String, Script>>,
    requests: Mutex<Vec<ModelRequest>>,
    events: Mutex<Vec<CallEvent>>,
    default_output: Value,
    default_delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            default_output: Value::Object(Default::default()),
            default_delay: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Output returned for unscripted calls.
    pub fn with_default_output(mut self, output: Value) -> Self {
        self.default_output = output;
        self
    }

    /// Delay applied to every call without a per-node delay.
    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = Some(delay);
        self
    }

    /// Queue responses for a node, consumed one per call.
    pub fn script(&self, node_id: &str, steps: impl IntoIterator<Item = Step>) {
        let mut scripts = self.scripts.lock().unwrap();
        scripts
            .entry(node_id.to_string())
            .or_default()
            .steps
            .extend(steps);
    }

    /// Keep returning the last scripted step once the queue is down to one.
    pub fn repeat_last(&self, node_id: &str) {
        let mut scripts = self.scripts.lock().unwrap();
        scripts.entry(node_id.to_string()).or_default().repeat_last = true;
    }

    /// Make every call for `node_id` take at least `delay`.
    pub fn delay(&self, node_id: &str, delay: Duration) {
        let mut scripts = self.scripts.lock().unwrap();
        scripts.entry(node_id.to_string()).or_default().delay = Some(delay);
    }

    /// Number of calls made for a node.
    pub fn call_count(&self, node_id: &str) -> usize {
        self.requests_for(node_id).len()
    }

    /// Attempt numbers seen for a node, in call order.
    pub fn attempts_for(&self, node_id: &str) -> Vec<u32> {
        self.requests_for(node_id).iter().map(|r| r.attempt).collect()
    }

    /// Every request made for a node.
    pub fn requests_for(&self, node_id: &str) -> Vec<ModelRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.node_id == node_id)
            .cloned()
            .collect()
    }

    /// Total number of calls.
    pub fn total_calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Start/finish boundaries of every call, in order.
    pub fn events(&self) -> Vec<CallEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Position of the first start of `node_id` in [`events`](Self::events).
    pub fn started_at(&self, node_id: &str) -> Option<usize> {
        self.events()
            .iter()
            .position(|e| matches!(e, CallEvent::Started { node_id: id, .. } if id == node_id))
    }

    /// Position of the last finish of `node_id` in [`events`](Self::events).
    pub fn finished_at(&self, node_id: &str) -> Option<usize> {
        self.events()
            .iter()
            .rposition(|e| matches!(e, CallEvent::Finished { node_id: id, .. } if id == node_id))
    }

    /// Highest number of calls that were in flight at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_step(&self, node_id: &str) -> (Step, Option<Duration>) {
        let mut scripts = self.scripts.lock().unwrap();
        let Some(script) = scripts.get_mut(node_id) else {
            return (Step::Output(self.default_output.clone()), self.default_delay);
        };
        let delay = script.delay.or(self.default_delay);
        let step = if script.repeat_last && script.steps.len() == 1 {
            script.steps.front().cloned()
        } else {
            script.steps.pop_front()
        };
        (
            step.unwrap_or_else(|| Step::Output(self.default_output.clone())),
            delay,
        )
    }
}

impl Default for ScriptedClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelClient for ScriptedClient {
    fn call(&self, request: ModelRequest) -> BoxFuture<'_, Result<Value, ModelError>> {
        Box::pin(async move {
            let node_id = request.node_id.clone();
            let attempt = request.attempt;
            let (step, delay) = self.next_step(&node_id);

            self.requests.lock().unwrap().push(request);
            self.events.lock().unwrap().push(CallEvent::Started {
                node_id: node_id.clone(),
                attempt,
            });
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.events
                .lock()
                .unwrap()
                .push(CallEvent::Finished { node_id, attempt });

            step.into_result()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(node_id: &str, attempt: u32) -> ModelRequest {
        ModelRequest {
            node_id: node_id.into(),
            prompt: String::new(),
            input: Default::default(),
            output_schema: json!({}),
            attempt,
        }
    }

    #[tokio::test]
    async fn test_script_consumed_in_order() {
        let client = ScriptedClient::new();
        client.script("a", [Step::Transient("busy".into()), Step::Output(json!(1))]);

        assert!(client.call(request("a", 1)).await.is_err());
        assert_eq!(client.call(request("a", 2)).await.unwrap(), json!(1));
        // Script exhausted: default output
        assert_eq!(client.call(request("a", 3)).await.unwrap(), json!({}));
        assert_eq!(client.attempts_for("a"), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_repeat_last() {
        let client = ScriptedClient::new();
        client.script("a", [Step::Fatal("nope".into())]);
        client.repeat_last("a");
        for attempt in 1..=3 {
            assert_eq!(
                client.call(request("a", attempt)).await.unwrap_err(),
                ModelError::fatal("nope")
            );
        }
    }

    #[tokio::test]
    async fn test_events_recorded() {
        let client = ScriptedClient::new().with_default_output(json!("x"));
        client.call(request("a", 1)).await.unwrap();
        assert_eq!(client.started_at("a"), Some(0));
        assert_eq!(client.finished_at("a"), Some(1));
        assert_eq!(client.max_in_flight(), 1);
    }
}
