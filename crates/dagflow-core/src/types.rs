use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Node identifier, unique within a graph.
pub type NodeId = String;

/// Unique run identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a node within one run.
///
/// The lifecycle is monotonic: `Pending -> Waiting -> Running -> {Succeeded | Failed}`.
/// `Blocked` and `Skipped` are assigned when a run finishes to nodes that never
/// ran: `Blocked` when a dependency failed (or was itself blocked), `Skipped`
/// when the run was aborted before the node could start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Pending,
    Waiting,
    Running,
    Succeeded,
    Failed,
    Blocked,
    Skipped,
}

impl NodeState {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeState::Succeeded | NodeState::Failed | NodeState::Blocked | NodeState::Skipped
        )
    }

    /// Whether the node never started and never will.
    pub fn is_unreached(self) -> bool {
        matches!(self, NodeState::Blocked | NodeState::Skipped)
    }

    /// Whether moving from `self` to `next` respects the lifecycle.
    pub fn can_transition_to(self, next: NodeState) -> bool {
        use NodeState::*;
        matches!(
            (self, next),
            (Pending, Waiting)
                | (Waiting, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Pending, Blocked)
                | (Waiting, Blocked)
                | (Pending, Skipped)
                | (Waiting, Skipped)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeState::Pending => "pending",
            NodeState::Waiting => "waiting",
            NodeState::Running => "running",
            NodeState::Succeeded => "succeeded",
            NodeState::Failed => "failed",
            NodeState::Blocked => "blocked",
            NodeState::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        assert!(NodeState::Pending.can_transition_to(NodeState::Waiting));
        assert!(NodeState::Waiting.can_transition_to(NodeState::Running));
        assert!(NodeState::Running.can_transition_to(NodeState::Succeeded));
        assert!(NodeState::Running.can_transition_to(NodeState::Failed));
        assert!(NodeState::Waiting.can_transition_to(NodeState::Blocked));
        assert!(NodeState::Pending.can_transition_to(NodeState::Skipped));
    }

    #[test]
    fn test_backward_and_terminal_transitions_rejected() {
        assert!(!NodeState::Running.can_transition_to(NodeState::Waiting));
        assert!(!NodeState::Pending.can_transition_to(NodeState::Running));
        assert!(!NodeState::Succeeded.can_transition_to(NodeState::Failed));
        assert!(!NodeState::Failed.can_transition_to(NodeState::Running));
        assert!(!NodeState::Running.can_transition_to(NodeState::Blocked));
        assert!(!NodeState::Blocked.can_transition_to(NodeState::Waiting));
    }

    #[test]
    fn test_terminal_states() {
        for state in [
            NodeState::Succeeded,
            NodeState::Failed,
            NodeState::Blocked,
            NodeState::Skipped,
        ] {
            assert!(state.is_terminal());
        }
        assert!(!NodeState::Running.is_terminal());
        assert!(!NodeState::Waiting.is_terminal());
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_string(&NodeState::Succeeded).unwrap();
        assert_eq!(json, "\"succeeded\"");
        let parsed: NodeState = serde_json::from_str("\"blocked\"").unwrap();
        assert_eq!(parsed, NodeState::Blocked);
    }

    #[test]
    fn test_run_id_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }
}
