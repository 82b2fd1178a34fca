//! Workflow graph: nodes plus the dependency and next-node relation between them.
//!
//! Adjacency is derived from both declared lists. If A lists B in
//! `next_nodes`, A is an effective dependency of B; if B lists A in
//! `dependencies`, B is an effective neighbor of A. The two lists therefore
//! never disagree about who gates whom.

pub mod descriptor;
pub mod node;

use std::collections::{BTreeMap, BTreeSet};

use petgraph::graphmap::DiGraphMap;

use dagflow_core::error::{FlowError, Result};

use crate::validator;

pub use node::Node;

/// An immutable-once-running collection of nodes keyed by id.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: BTreeMap<String, Node>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from nodes, rejecting duplicate ids.
    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Result<Self> {
        let mut graph = Self::new();
        for node in nodes {
            graph.add_node(node)?;
        }
        Ok(graph)
    }

    /// Insert a node. Fails with `DuplicateId` if the id is already present.
    pub fn add_node(&mut self, node: Node) -> Result<()> {
        if node.id.trim().is_empty() {
            return Err(FlowError::MalformedNode {
                node: node.id,
                message: "node id must not be empty".to_string(),
            });
        }
        if self.nodes.contains_key(&node.id) {
            return Err(FlowError::DuplicateId(node.id));
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// All nodes, ordered by id.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// All node ids, ordered.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes with no effective dependencies.
    pub fn roots(&self) -> Vec<&Node> {
        self.nodes
            .values()
            .filter(|n| self.dependencies_of(&n.id).is_empty())
            .collect()
    }

    /// Effective dependencies of a node: its declared `dependencies` plus every
    /// node that lists it in `next_nodes`.
    pub fn dependencies_of(&self, id: &str) -> BTreeSet<&str> {
        let mut deps: BTreeSet<&str> = self
            .nodes
            .get(id)
            .map(|n| n.dependencies.iter().map(|s| s.as_str()).collect())
            .unwrap_or_default();
        for other in self.nodes.values() {
            if other.next_nodes.iter().any(|next| next == id) {
                deps.insert(other.id.as_str());
            }
        }
        deps
    }

    /// Effective fan-out of a node: its declared `next_nodes` plus every node
    /// that lists it as a dependency. Pure query.
    pub fn neighbors_of(&self, id: &str) -> BTreeSet<&str> {
        let mut next: BTreeSet<&str> = self
            .nodes
            .get(id)
            .map(|n| n.next_nodes.iter().map(|s| s.as_str()).collect())
            .unwrap_or_default();
        for other in self.nodes.values() {
            if other.dependencies.iter().any(|dep| dep == id) {
                next.insert(other.id.as_str());
            }
        }
        next
    }

    /// Check that every dependency / next-node reference names a node in this graph.
    pub fn validate_references(&self) -> Result<()> {
        for node in self.nodes.values() {
            let refs = node
                .dependencies
                .iter()
                .map(|r| (r, "dependencies"))
                .chain(node.next_nodes.iter().map(|r| (r, "next_nodes")));
            for (reference, field) in refs {
                if !self.nodes.contains_key(reference) {
                    return Err(FlowError::DanglingReference {
                        node: node.id.clone(),
                        reference: reference.clone(),
                        field: field.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Fail with `CycleDetected` if the dependency relation has a cycle.
    pub fn validate_acyclic(&self) -> Result<()> {
        self.topological_order().map(|_| ())
    }

    /// Node ids in an order where every node follows all of its dependencies.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let mut dag: DiGraphMap<&str, ()> = DiGraphMap::new();
        for id in self.nodes.keys() {
            dag.add_node(id.as_str());
        }
        for node in self.nodes.values() {
            for dep in &node.dependencies {
                if *dep == node.id {
                    return Err(FlowError::CycleDetected(node.id.clone()));
                }
                dag.add_edge(dep.as_str(), node.id.as_str(), ());
            }
            for next in &node.next_nodes {
                if *next == node.id {
                    return Err(FlowError::CycleDetected(node.id.clone()));
                }
                dag.add_edge(node.id.as_str(), next.as_str(), ());
            }
        }

        petgraph::algo::toposort(&dag, None)
            .map(|order| order.into_iter().map(str::to_string).collect())
            .map_err(|cycle| FlowError::CycleDetected(cycle.node_id().to_string()))
    }

    /// Check that every node's `output_schema` is an object that compiles.
    pub fn validate_schemas(&self) -> Result<()> {
        for node in self.nodes.values() {
            validator::check_schema(&node.output_schema).map_err(|message| {
                FlowError::MalformedNode {
                    node: node.id.clone(),
                    message,
                }
            })?;
        }
        Ok(())
    }

    /// Full structural check, run before any execution.
    pub fn validate(&self) -> Result<()> {
        self.validate_schemas()?;
        self.validate_references()?;
        self.validate_acyclic()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> Graph {
        Graph::from_nodes([
            Node::new("a", "").then(["b", "c"]),
            Node::new("b", "").depends_on(["a"]),
            Node::new("c", "").depends_on(["a"]),
            Node::new("d", "").depends_on(["b", "c"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut graph = Graph::new();
        graph.add_node(Node::new("a", "")).unwrap();
        let err = graph.add_node(Node::new("a", "again")).unwrap_err();
        assert!(matches!(err, FlowError::DuplicateId(id) if id == "a"));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_empty_id_rejected() {
        let err = Graph::new().add_node(Node::new("  ", "")).unwrap_err();
        assert!(matches!(err, FlowError::MalformedNode { .. }));
    }

    #[test]
    fn test_roots() {
        let graph = diamond();
        let roots: Vec<&str> = graph.roots().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(roots, vec!["a"]);
    }

    #[test]
    fn test_next_nodes_imply_dependency() {
        // "y" declares no dependencies but "x" lists it as next.
        let graph = Graph::from_nodes([Node::new("x", "").then(["y"]), Node::new("y", "")]).unwrap();
        assert_eq!(graph.dependencies_of("y").into_iter().collect::<Vec<_>>(), vec!["x"]);
        assert_eq!(graph.roots().len(), 1);
    }

    #[test]
    fn test_neighbors_union() {
        let graph = diamond();
        let next: Vec<&str> = graph.neighbors_of("a").into_iter().collect();
        assert_eq!(next, vec!["b", "c"]);
        let next: Vec<&str> = graph.neighbors_of("b").into_iter().collect();
        assert_eq!(next, vec!["d"]);
        assert!(graph.neighbors_of("d").is_empty());
        assert!(graph.neighbors_of("missing").is_empty());
    }

    #[test]
    fn test_dangling_reference() {
        let graph = Graph::from_nodes([Node::new("a", "").depends_on(["ghost"])]).unwrap();
        match graph.validate().unwrap_err() {
            FlowError::DanglingReference { node, reference, field } => {
                assert_eq!(node, "a");
                assert_eq!(reference, "ghost");
                assert_eq!(field, "dependencies");
            }
            other => panic!("unexpected error: {other}"),
        }

        let graph = Graph::from_nodes([Node::new("a", "").then(["ghost"])]).unwrap();
        assert!(matches!(
            graph.validate().unwrap_err(),
            FlowError::DanglingReference { field, .. } if field == "next_nodes"
        ));
    }

    #[test]
    fn test_cycle_detected() {
        let graph = Graph::from_nodes([
            Node::new("a", "").depends_on(["c"]),
            Node::new("b", "").depends_on(["a"]),
            Node::new("c", "").depends_on(["b"]),
            Node::new("root", ""),
        ])
        .unwrap();
        match graph.validate_acyclic().unwrap_err() {
            FlowError::CycleDetected(node) => assert!(["a", "b", "c"].contains(&node.as_str())),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cycle_through_next_nodes() {
        let graph = Graph::from_nodes([
            Node::new("a", "").then(["b"]),
            Node::new("b", "").then(["a"]),
        ])
        .unwrap();
        assert!(matches!(
            graph.validate().unwrap_err(),
            FlowError::CycleDetected(_)
        ));
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let graph = Graph::from_nodes([Node::new("a", "").depends_on(["a"])]).unwrap();
        assert!(matches!(
            graph.validate_acyclic().unwrap_err(),
            FlowError::CycleDetected(id) if id == "a"
        ));
    }

    #[test]
    fn test_topological_order() {
        let graph = diamond();
        let order = graph.topological_order().unwrap();
        let pos = |id: &str| order.iter().position(|o| o == id).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("d"));
    }

    #[test]
    fn test_schemas_checked_for_graphs_built_in_code() {
        use serde_json::json;

        let graph = Graph::from_nodes([
            Node::new("ok", "").with_schema(json!({"type": "object"})),
            Node::new("bad", "").with_schema(json!("object")),
        ])
        .unwrap();
        match graph.validate().unwrap_err() {
            FlowError::MalformedNode { node, message } => {
                assert_eq!(node, "bad");
                assert!(message.contains("must be an object"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let graph =
            Graph::from_nodes([Node::new("a", "").with_schema(json!({"type": "strng"}))]).unwrap();
        assert!(matches!(
            graph.validate_schemas().unwrap_err(),
            FlowError::MalformedNode { .. }
        ));
    }

    #[test]
    fn test_empty_graph_is_valid() {
        let graph = Graph::new();
        assert!(graph.validate().is_ok());
        assert!(graph.roots().is_empty());
        assert!(graph.is_empty());
    }
}
