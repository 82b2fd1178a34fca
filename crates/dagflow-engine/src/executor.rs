use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use dagflow_core::config::{EngineConfig, FailurePolicy};
use dagflow_core::error::{FlowError, Result};
use dagflow_core::event::{EventBus, RunEvent};
use dagflow_core::traits::{ModelClient, ModelRequest};
use dagflow_core::types::{NodeState, RunId};

use crate::gate::{Arrival, JoinGate};
use crate::graph::{Graph, Node};
use crate::report::{NodeFailure, RunReport};
use crate::repair;
use crate::retry::{call_with_retry, RetryOutcome};
use crate::state::{Completion, StateTable};
use crate::validator::{self, ValidationResult};

/// Immutable plan plus shared mutable state for one run.
struct RunContext {
    nodes: HashMap<String, Node>,
    /// Effective dependencies, ordered by id.
    dependencies: HashMap<String, Vec<String>>,
    /// Effective fan-out, ordered by id.
    neighbors: HashMap<String, Vec<String>>,
    gates: HashMap<String, JoinGate>,
    states: StateTable,
    client: Arc<dyn ModelClient>,
    config: EngineConfig,
    events: Arc<EventBus>,
    cancel: CancellationToken,
    permits: Option<Arc<Semaphore>>,
}

impl RunContext {
    fn dependencies_of(&self, id: &str) -> &[String] {
        self.dependencies.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn neighbors_of(&self, id: &str) -> &[String] {
        self.neighbors.get(id).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Executes a workflow graph.
///
/// Every root starts immediately; each node that succeeds triggers its
/// neighbors, and a neighbor runs once its join gate has seen every
/// dependency succeed. Independent branches run concurrently as separate
/// tokio tasks. Failures block dependents without disturbing unrelated
/// branches unless the failure policy is `AbortAll`.
pub struct GraphExecutor {
    client: Arc<dyn ModelClient>,
    config: EngineConfig,
    events: Arc<EventBus>,
}

impl GraphExecutor {
    pub fn new(client: Arc<dyn ModelClient>, config: EngineConfig) -> Self {
        let events = Arc::new(EventBus::new(config.event_capacity));
        Self {
            client,
            config,
            events,
        }
    }

    /// Publish run events on an existing bus.
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to events of subsequent runs.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    /// Run the graph to completion.
    ///
    /// Unusable configuration and structural problems fail the whole call
    /// before any node runs.
    /// Per-node failures never do; they are reported in the [`RunReport`].
    pub async fn execute(&self, graph: &Graph) -> Result<RunReport> {
        self.execute_with_cancel(graph, CancellationToken::new()).await
    }

    /// Like [`execute`](Self::execute), but cancelling `cancel` aborts the
    /// run: in-flight nodes fail as cancelled and unstarted nodes are skipped.
    pub async fn execute_with_cancel(
        &self,
        graph: &Graph,
        cancel: CancellationToken,
    ) -> Result<RunReport> {
        self.config.validate()?;
        graph.validate()?;
        let order = graph.topological_order()?;

        let run_id = RunId::new();
        let started_at = Utc::now();
        let start = Instant::now();
        let ctx = Arc::new(self.plan(graph, cancel.child_token()));

        info!(run_id = %run_id, nodes = graph.len(), "Starting graph run");
        self.events.publish(RunEvent::RunStarted {
            run_id: run_id.clone(),
            node_count: graph.len(),
        });

        let mut tasks: JoinSet<(String, Option<Completion>)> = JoinSet::new();

        for root in graph.roots() {
            ctx.states.mark_waiting(&root.id)?;
            if ctx.gates[&root.id].try_claim() == Arrival::Run {
                start_node(&ctx, &root.id, &mut tasks)?;
            }
        }

        while let Some(joined) = tasks.join_next().await {
            let (node_id, completion) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!(error = %e, "Node task ended abnormally");
                    continue;
                }
            };
            match completion {
                Some(completion) => self.finish_node(&ctx, &node_id, completion, &mut tasks)?,
                None => debug!(node_id = %node_id, "Node never started"),
            }
        }

        finalize(&ctx, &order)?;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let report = RunReport {
            run_id: run_id.clone(),
            started_at,
            elapsed_ms,
            nodes: ctx.states.reports(),
        };

        info!(
            run_id = %run_id,
            succeeded = report.succeeded().len(),
            failed = report.failed().len(),
            blocked = report.blocked().len(),
            skipped = report.skipped().len(),
            elapsed_ms,
            "Graph run complete"
        );
        self.events.publish(RunEvent::RunFinished {
            run_id,
            succeeded: report.is_success(),
            elapsed_ms,
        });

        Ok(report)
    }

    fn plan(&self, graph: &Graph, cancel: CancellationToken) -> RunContext {
        let mut dependencies = HashMap::new();
        let mut neighbors = HashMap::new();
        let mut gates = HashMap::new();

        for id in graph.ids() {
            let deps: Vec<String> = graph
                .dependencies_of(id)
                .into_iter()
                .map(str::to_string)
                .collect();
            let next: Vec<String> = graph
                .neighbors_of(id)
                .into_iter()
                .map(str::to_string)
                .collect();
            gates.insert(id.to_string(), JoinGate::new(deps.len()));
            dependencies.insert(id.to_string(), deps);
            neighbors.insert(id.to_string(), next);
        }

        RunContext {
            nodes: graph.nodes().map(|n| (n.id.clone(), n.clone())).collect(),
            dependencies,
            neighbors,
            gates,
            states: StateTable::new(graph.ids()),
            client: self.client.clone(),
            config: self.config.clone(),
            events: self.events.clone(),
            cancel,
            permits: self
                .config
                .max_concurrency
                .map(|n| Arc::new(Semaphore::new(n))),
        }
    }

    /// Record a node's completion and fan out to its neighbors.
    fn finish_node(
        &self,
        ctx: &Arc<RunContext>,
        node_id: &str,
        completion: Completion,
        tasks: &mut JoinSet<(String, Option<Completion>)>,
    ) -> Result<()> {
        match &completion {
            Completion::Succeeded { attempts, .. } => {
                info!(node_id = %node_id, attempts, "Node succeeded");
                self.events.publish(RunEvent::NodeSucceeded {
                    node_id: node_id.to_string(),
                    attempts: *attempts,
                });
            }
            Completion::Failed { failure, attempts } => {
                warn!(node_id = %node_id, attempts, error = %failure, "Node failed");
                self.events.publish(RunEvent::NodeFailed {
                    node_id: node_id.to_string(),
                    attempts: *attempts,
                    error: failure.to_string(),
                });
            }
        }

        let succeeded = matches!(completion, Completion::Succeeded { .. });
        ctx.states.complete(node_id, completion)?;

        if !succeeded {
            if ctx.config.failure_policy == FailurePolicy::AbortAll && !ctx.cancel.is_cancelled() {
                warn!(node_id = %node_id, "Aborting run after node failure");
                ctx.cancel.cancel();
            }
            return Ok(());
        }

        for next in ctx.neighbors_of(node_id) {
            trigger(ctx, next, tasks)?;
        }
        Ok(())
    }
}

/// One predecessor edge into `node_id` has been satisfied.
fn trigger(
    ctx: &Arc<RunContext>,
    node_id: &str,
    tasks: &mut JoinSet<(String, Option<Completion>)>,
) -> Result<()> {
    ctx.states.mark_waiting(node_id)?;
    let gate = ctx
        .gates
        .get(node_id)
        .ok_or_else(|| FlowError::UnknownNode(node_id.to_string()))?;

    match gate.arrive() {
        Arrival::Wait {
            satisfied,
            required,
        } => {
            debug!(node_id = %node_id, satisfied, required, "Node waiting on dependencies");
            ctx.events.publish(RunEvent::NodeWaiting {
                node_id: node_id.to_string(),
                satisfied,
                required,
            });
            Ok(())
        }
        Arrival::Run => start_node(ctx, node_id, tasks),
        Arrival::Rejected => {
            warn!(node_id = %node_id, "Ignoring trigger for already claimed node");
            Ok(())
        }
    }
}

/// Spawn the task for a claimed node.
///
/// The node turns `Running` only once it holds a concurrency slot, so time
/// spent queued behind `max_concurrency` is not counted against it. A task
/// that never gets a slot yields `None` and the node stays `Waiting`.
fn start_node(
    ctx: &Arc<RunContext>,
    node_id: &str,
    tasks: &mut JoinSet<(String, Option<Completion>)>,
) -> Result<()> {
    if ctx.cancel.is_cancelled() {
        debug!(node_id = %node_id, "Run cancelled, not starting node");
        return Ok(());
    }

    let task_ctx = ctx.clone();
    let id = node_id.to_string();
    tasks.spawn(async move {
        let Some(_permit) = acquire_slot(&task_ctx).await else {
            debug!(node_id = %id, "Run cancelled while node queued");
            return (id, None);
        };
        if let Err(e) = task_ctx.states.transition(&id, NodeState::Running) {
            error!(node_id = %id, error = %e, "Node could not start");
            return (id, None);
        }
        info!(node_id = %id, "Executing graph node");
        task_ctx.events.publish(RunEvent::NodeStarted {
            node_id: id.clone(),
        });

        let completion = AssertUnwindSafe(run_node(task_ctx, id.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                error!(node_id = %id, "Node task panicked");
                Completion::Failed {
                    failure: NodeFailure::Fatal {
                        message: "node task panicked".to_string(),
                    },
                    attempts: 0,
                }
            });
        (id, Some(completion))
    });
    Ok(())
}

/// Wait for a concurrency slot; the inner `None` means the run is unbounded.
/// Returns `None` if the run is cancelled first.
async fn acquire_slot(ctx: &RunContext) -> Option<Option<OwnedSemaphorePermit>> {
    let Some(permits) = &ctx.permits else {
        return Some(None);
    };
    tokio::select! {
        permit = permits.clone().acquire_owned() => permit.ok().map(Some),
        _ = ctx.cancel.cancelled() => None,
    }
}

/// Body of one node: build the request, call the model with retries,
/// validate the output.
async fn run_node(ctx: Arc<RunContext>, node_id: String) -> Completion {
    let Some(node) = ctx.nodes.get(&node_id) else {
        return Completion::Failed {
            failure: NodeFailure::Fatal {
                message: format!("node '{}' missing from plan", node_id),
            },
            attempts: 0,
        };
    };

    let upstream: Vec<(String, Value)> = ctx
        .dependencies_of(&node_id)
        .iter()
        .filter_map(|dep| {
            ctx.states
                .record(dep)
                .and_then(|r| r.output)
                .map(|output| (dep.clone(), output))
        })
        .collect();
    let input = node.effective_input(upstream.iter().map(|(id, v)| (id.as_str(), v)));
    let prompt = node.render_prompt(&input);

    let request = ModelRequest {
        node_id: node_id.clone(),
        prompt,
        input,
        output_schema: node.output_schema.clone(),
        attempt: 0,
    };
    let retry_config = match node.max_retries {
        Some(budget) => ctx.config.retry.with_max_retries(budget),
        None => ctx.config.retry.clone(),
    };

    let outcome = call_with_retry(
        ctx.client.as_ref(),
        request,
        &retry_config,
        &ctx.cancel,
        |attempt, backoff, error| {
            ctx.events.publish(RunEvent::NodeRetrying {
                node_id: node_id.clone(),
                attempt,
                backoff_ms: backoff.as_millis() as u64,
                error: error.to_string(),
            });
        },
    )
    .await;

    match outcome {
        RetryOutcome::Succeeded { output, attempts } => {
            let output = if ctx.config.repair_text_output {
                repair::coerce_text_output(output, &node.output_schema)
            } else {
                output
            };
            match validator::validate(&output, &node.output_schema) {
                ValidationResult::Valid(output) => Completion::Succeeded { output, attempts },
                ValidationResult::Invalid { issues } => {
                    debug!(node_id = %node_id, issues = issues.len(), "Output failed validation");
                    Completion::Failed {
                        failure: NodeFailure::Validation { issues },
                        attempts,
                    }
                }
            }
        }
        RetryOutcome::Exhausted { error, attempts } => Completion::Failed {
            failure: NodeFailure::Transient {
                message: error.message().to_string(),
            },
            attempts,
        },
        RetryOutcome::Fatal { error, attempts } => Completion::Failed {
            failure: NodeFailure::Fatal {
                message: error.message().to_string(),
            },
            attempts,
        },
        RetryOutcome::Cancelled { attempts } => Completion::Failed {
            failure: NodeFailure::Cancelled,
            attempts,
        },
    }
}

/// Give every node that never reached a terminal state an explicit one.
///
/// Walks in topological order so a node sees its dependencies' final states.
fn finalize(ctx: &RunContext, order: &[String]) -> Result<()> {
    for id in order {
        match ctx.states.state(id) {
            Some(NodeState::Pending | NodeState::Waiting) => {
                let blocked_by: Vec<String> = ctx
                    .dependencies_of(id)
                    .iter()
                    .filter(|dep| {
                        matches!(
                            ctx.states.state(dep),
                            Some(NodeState::Failed | NodeState::Blocked)
                        )
                    })
                    .cloned()
                    .collect();

                if blocked_by.is_empty() {
                    debug!(node_id = %id, "Node skipped");
                    ctx.states.transition(id, NodeState::Skipped)?;
                    ctx.events.publish(RunEvent::NodeSkipped {
                        node_id: id.clone(),
                    });
                } else {
                    debug!(node_id = %id, blocked_by = ?blocked_by, "Node blocked");
                    ctx.states.block(id, blocked_by.clone())?;
                    ctx.events.publish(RunEvent::NodeBlocked {
                        node_id: id.clone(),
                        blocked_by,
                    });
                }
            }
            Some(NodeState::Running) => {
                error!(node_id = %id, "Node task lost while running");
                ctx.states.complete(
                    id,
                    Completion::Failed {
                        failure: NodeFailure::Cancelled,
                        attempts: 0,
                    },
                )?;
            }
            _ => {}
        }
    }
    Ok(())
}
