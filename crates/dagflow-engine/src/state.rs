use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde_json::Value;
use tracing::trace;

use dagflow_core::error::{FlowError, Result};
use dagflow_core::types::NodeState;

use crate::report::{NodeFailure, NodeReport};

/// Mutable per-run record of one node.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub state: NodeState,
    pub output: Option<Value>,
    pub failure: Option<NodeFailure>,
    pub attempts: u32,
    pub blocked_by: Vec<String>,
    started: Option<Instant>,
    elapsed_ms: u64,
}

impl NodeRecord {
    fn pending() -> Self {
        Self {
            state: NodeState::Pending,
            output: None,
            failure: None,
            attempts: 0,
            blocked_by: Vec::new(),
            started: None,
            elapsed_ms: 0,
        }
    }
}

/// How a running node finished.
#[derive(Debug, Clone)]
pub enum Completion {
    Succeeded { output: Value, attempts: u32 },
    Failed { failure: NodeFailure, attempts: u32 },
}

/// Node states for one run, shared between the scheduler and node tasks.
///
/// Every change goes through [`apply`], which rejects moves the lifecycle
/// does not allow. Terminal records are never modified again.
#[derive(Debug)]
pub struct StateTable {
    records: Mutex<HashMap<String, NodeRecord>>,
}

impl StateTable {
    /// All nodes start `Pending`.
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let records = ids
            .into_iter()
            .map(|id| (id.into(), NodeRecord::pending()))
            .collect();
        Self {
            records: Mutex::new(records),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, NodeRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self, id: &str) -> Option<NodeState> {
        self.lock().get(id).map(|r| r.state)
    }

    pub fn record(&self, id: &str) -> Option<NodeRecord> {
        self.lock().get(id).cloned()
    }

    /// Move a node to `to`, returning the previous state.
    pub fn transition(&self, id: &str, to: NodeState) -> Result<NodeState> {
        apply(&mut self.lock(), id, to, |_| {})
    }

    /// Move a `Pending` node to `Waiting`. Returns `false` if it already left `Pending`.
    pub fn mark_waiting(&self, id: &str) -> Result<bool> {
        let mut records = self.lock();
        match records.get(id).map(|r| r.state) {
            Some(NodeState::Pending) => {
                apply(&mut records, id, NodeState::Waiting, |_| {})?;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(FlowError::UnknownNode(id.to_string())),
        }
    }

    /// Record the end of a running node.
    pub fn complete(&self, id: &str, completion: Completion) -> Result<()> {
        let mut records = self.lock();
        match completion {
            Completion::Succeeded { output, attempts } => {
                apply(&mut records, id, NodeState::Succeeded, |r| {
                    r.output = Some(output);
                    r.attempts = attempts;
                })
            }
            Completion::Failed { failure, attempts } => {
                apply(&mut records, id, NodeState::Failed, |r| {
                    r.failure = Some(failure);
                    r.attempts = attempts;
                })
            }
        }
        .map(|_| ())
    }

    /// Mark a node that never ran as `Blocked` by the given dependencies.
    pub fn block(&self, id: &str, blocked_by: Vec<String>) -> Result<()> {
        apply(&mut self.lock(), id, NodeState::Blocked, move |r| {
            r.blocked_by = blocked_by;
        })
        .map(|_| ())
    }

    /// Snapshot of every node as a report, ordered by node id.
    pub fn reports(&self) -> BTreeMap<String, NodeReport> {
        self.lock()
            .iter()
            .map(|(id, r)| {
                let report = NodeReport {
                    node_id: id.clone(),
                    state: r.state,
                    output: r.output.clone(),
                    failure: r.failure.clone(),
                    attempts: r.attempts,
                    retries: r.attempts.saturating_sub(1),
                    blocked_by: r.blocked_by.clone(),
                    elapsed_ms: r.elapsed_ms,
                };
                (id.clone(), report)
            })
            .collect()
    }
}

/// The single transition function.
fn apply<F>(
    records: &mut HashMap<String, NodeRecord>,
    id: &str,
    to: NodeState,
    update: F,
) -> Result<NodeState>
where
    F: FnOnce(&mut NodeRecord),
{
    let record = records
        .get_mut(id)
        .ok_or_else(|| FlowError::UnknownNode(id.to_string()))?;
    let from = record.state;
    if !from.can_transition_to(to) {
        return Err(FlowError::IllegalTransition {
            node: id.to_string(),
            from,
            to,
        });
    }

    match to {
        NodeState::Running => record.started = Some(Instant::now()),
        NodeState::Succeeded | NodeState::Failed => {
            record.elapsed_ms = record
                .started
                .map(|s| s.elapsed().as_millis() as u64)
                .unwrap_or_default();
        }
        _ => {}
    }
    record.state = to;
    update(record);

    trace!(node_id = %id, %from, %to, "Node state transition");
    Ok(from)
}
