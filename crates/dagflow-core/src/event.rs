use tokio::sync::broadcast;

use crate::types::{NodeState, RunId};

/// Progress notifications emitted while a graph runs.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// Run started; structural validation passed.
    RunStarted { run_id: RunId, node_count: usize },
    /// A predecessor triggered this node but other dependencies are outstanding.
    NodeWaiting { node_id: String, satisfied: usize, required: usize },
    /// The node claimed its join gate and is about to call the model.
    NodeStarted { node_id: String },
    /// A transient model failure will be retried after `backoff_ms`.
    NodeRetrying { node_id: String, attempt: u32, backoff_ms: u64, error: String },
    /// The node's output passed validation.
    NodeSucceeded { node_id: String, attempts: u32 },
    /// The node ended in `Failed`.
    NodeFailed { node_id: String, attempts: u32, error: String },
    /// The node can never run because a dependency failed.
    NodeBlocked { node_id: String, blocked_by: Vec<String> },
    /// The node never ran because the run was aborted.
    NodeSkipped { node_id: String },
    /// Every node reached a terminal state.
    RunFinished { run_id: RunId, succeeded: bool, elapsed_ms: u64 },
}

impl RunEvent {
    /// The node this event concerns, if any.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            RunEvent::NodeWaiting { node_id, .. }
            | RunEvent::NodeStarted { node_id }
            | RunEvent::NodeRetrying { node_id, .. }
            | RunEvent::NodeSucceeded { node_id, .. }
            | RunEvent::NodeFailed { node_id, .. }
            | RunEvent::NodeBlocked { node_id, .. }
            | RunEvent::NodeSkipped { node_id } => Some(node_id),
            RunEvent::RunStarted { .. } | RunEvent::RunFinished { .. } => None,
        }
    }

    /// The state a node is in once this event has been published.
    pub fn node_state(&self) -> Option<NodeState> {
        match self {
            RunEvent::NodeWaiting { .. } => Some(NodeState::Waiting),
            RunEvent::NodeStarted { .. } | RunEvent::NodeRetrying { .. } => {
                Some(NodeState::Running)
            }
            RunEvent::NodeSucceeded { .. } => Some(NodeState::Succeeded),
            RunEvent::NodeFailed { .. } => Some(NodeState::Failed),
            RunEvent::NodeBlocked { .. } => Some(NodeState::Blocked),
            RunEvent::NodeSkipped { .. } => Some(NodeState::Skipped),
            RunEvent::RunStarted { .. } | RunEvent::RunFinished { .. } => None,
        }
    }
}

/// Fan-out of [`RunEvent`]s to any number of subscribers.
///
/// Slow subscribers lag rather than block the run: once a receiver falls
/// `capacity` events behind, it skips ahead and sees `RecvError::Lagged`.
pub struct EventBus {
    tx: broadcast::Sender<RunEvent>,
}

impl EventBus {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Deliver `event` to current subscribers. Nobody listening is fine.
    pub fn publish(&self, event: RunEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(RunEvent::NodeStarted {
            node_id: "a".into(),
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.node_id(), Some("a"));
        assert_eq!(event.node_state(), Some(NodeState::Running));
    }

    #[tokio::test]
    async fn test_zero_capacity_does_not_panic() {
        let bus = EventBus::new(0);
        let mut rx = bus.subscribe();
        bus.publish(RunEvent::NodeSkipped {
            node_id: "a".into(),
        });
        assert_eq!(rx.recv().await.unwrap().node_id(), Some("a"));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        bus.publish(RunEvent::NodeSkipped {
            node_id: "a".into(),
        });
    }
}
