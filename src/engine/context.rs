//! Live graph state: engine nodes and the four-way id partition.
//!
//! An [`EngineContext`] is owned and mutated by exactly one graph processor
//! at a time; everyone else sees copy-on-write snapshots published through
//! a watch channel, so a node processor holding a snapshot never observes a
//! later mutation. Every node id in the map is in exactly one of the
//! pending, active, succeeded or failed sets until it is evicted from the
//! map entirely.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use tracing::warn;

use crate::errors::EngineError;
use crate::graph::{DependencyType, Graph, Node, NodeDetails, NodeId, NodeNamespace, ResultType};

/// Execution progress of one node id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Active,
    Succeeded,
    Failed,
}

/// A node plus its mutable execution state.
///
/// Completed exactly once by the owning graph processor; shared read-only
/// everywhere else.
#[derive(Clone, Debug)]
pub struct EngineNode {
    node: Arc<Node>,
    complete: bool,
    result: Option<Value>,
    error: Option<EngineError>,
}

impl EngineNode {
    fn fresh(node: Node) -> Self {
        Self {
            node: Arc::new(node),
            complete: false,
            result: None,
            error: None,
        }
    }

    #[must_use]
    pub fn node(&self) -> &Node {
        &self.node
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    #[must_use]
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    #[must_use]
    pub fn error(&self) -> Option<&EngineError> {
        self.error.as_ref()
    }
}

/// The mutable state of one executing graph.
#[derive(Clone, Debug)]
pub struct EngineContext {
    nodes: FxHashMap<NodeId, Arc<EngineNode>>,
    deps: FxHashMap<NodeId, Arc<FxHashMap<NodeId, DependencyType>>>,
    pending: FxHashSet<NodeId>,
    active: FxHashSet<NodeId>,
    succeeded: FxHashSet<NodeId>,
    failed: FxHashSet<NodeId>,
    root: NodeId,
}

impl EngineContext {
    #[must_use]
    pub fn from_graph(graph: &Graph) -> Self {
        let mut nodes = FxHashMap::default();
        let mut deps = FxHashMap::default();
        let mut pending = FxHashSet::default();
        for (id, node) in graph.nodes() {
            deps.insert(id.clone(), Arc::new(node.dependencies()));
            nodes.insert(id.clone(), Arc::new(EngineNode::fresh(node.clone())));
            pending.insert(id.clone());
        }
        Self {
            nodes,
            deps,
            pending,
            active: FxHashSet::default(),
            succeeded: FxHashSet::default(),
            failed: FxHashSet::default(),
            root: graph.root().clone(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &NodeId {
        &self.root
    }

    #[must_use]
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&Arc<EngineNode>> {
        self.nodes.get(id)
    }

    #[must_use]
    pub fn dependencies(&self, id: &NodeId) -> Option<&Arc<FxHashMap<NodeId, DependencyType>>> {
        self.deps.get(id)
    }

    #[must_use]
    pub fn state_of(&self, id: &NodeId) -> Option<NodeState> {
        if self.pending.contains(id) {
            Some(NodeState::Pending)
        } else if self.active.contains(id) {
            Some(NodeState::Active)
        } else if self.succeeded.contains(id) {
            Some(NodeState::Succeeded)
        } else if self.failed.contains(id) {
            Some(NodeState::Failed)
        } else {
            None
        }
    }

    /// Pending ids in a stable order, so scheduling passes and their logs
    /// are reproducible.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.pending.iter().cloned().collect();
        ids.sort_by_key(ToString::to_string);
        ids
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    #[must_use]
    pub fn has_active(&self) -> bool {
        !self.active.is_empty()
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Errors of every failed node, in stable id order.
    #[must_use]
    pub fn failure_errors(&self) -> Vec<EngineError> {
        let mut ids: Vec<&NodeId> = self.failed.iter().collect();
        ids.sort_by_key(|id| id.to_string());
        ids.iter()
            .filter_map(|id| self.nodes.get(id))
            .filter_map(|node| node.error().cloned())
            .collect()
    }

    pub fn mark_active(&mut self, id: &NodeId) {
        if self.pending.remove(id) {
            self.active.insert(id.clone());
        }
    }

    pub fn mark_succeeded(&mut self, id: &NodeId, result: Value) {
        let Some(entry) = self.nodes.get_mut(id) else {
            warn!(node = %id, "completion for a node no longer in the graph");
            return;
        };
        let mut updated = EngineNode::clone(entry);
        updated.complete = true;
        updated.result = Some(result);
        *entry = Arc::new(updated);
        self.pending.remove(id);
        self.active.remove(id);
        self.failed.remove(id);
        self.succeeded.insert(id.clone());
    }

    pub fn mark_failed(&mut self, id: &NodeId, error: EngineError) {
        let Some(entry) = self.nodes.get_mut(id) else {
            warn!(node = %id, "failure for a node no longer in the graph");
            return;
        };
        let mut updated = EngineNode::clone(entry);
        updated.complete = true;
        updated.error = Some(error);
        *entry = Arc::new(updated);
        self.pending.remove(id);
        self.active.remove(id);
        self.succeeded.remove(id);
        self.failed.insert(id.clone());
    }

    /// Add a node produced by a dynamic graph update; it starts pending.
    pub fn insert_pending(&mut self, node: Node) {
        let id = node.id().clone();
        self.deps.insert(id.clone(), Arc::new(node.dependencies()));
        self.nodes.insert(id.clone(), Arc::new(EngineNode::fresh(node)));
        self.pending.insert(id);
    }

    /// Insert an already completed node, used for bundle materialization.
    pub fn insert_completed(&mut self, id: NodeId, value: Value) {
        if self.nodes.contains_key(&id) {
            warn!(node = %id, "bundle item shadows an existing node; keeping the original");
            return;
        }
        let node = Node::new(
            id.clone(),
            NodeDetails::StaticValue {
                value: value.clone(),
            },
        );
        let mut engine_node = EngineNode::fresh(node);
        engine_node.complete = true;
        engine_node.result = Some(value);
        self.deps.insert(id.clone(), Arc::new(FxHashMap::default()));
        self.nodes.insert(id.clone(), Arc::new(engine_node));
        self.succeeded.insert(id);
    }

    /// Attach a dependency edge added by a dynamic graph update.
    pub fn add_dependency(&mut self, dependent: &NodeId, dependency: NodeId, dep_type: DependencyType) {
        if let Some(existing) = self.deps.get_mut(dependent) {
            let mut updated = FxHashMap::clone(existing);
            updated.insert(dependency, dep_type);
            *existing = Arc::new(updated);
        }
    }

    /// Drop succeeded nodes no pending or active node still depends on.
    /// The root node is exempt; its result is the job result.
    pub fn evict_stale(&mut self) {
        let mut referenced: FxHashSet<&NodeId> = FxHashSet::default();
        for id in self.pending.iter().chain(self.active.iter()) {
            if let Some(deps) = self.deps.get(id) {
                referenced.extend(deps.keys());
            }
        }
        let stale: Vec<NodeId> = self
            .succeeded
            .iter()
            .filter(|id| **id != self.root && !referenced.contains(*id))
            .cloned()
            .collect();
        for id in stale {
            self.succeeded.remove(&id);
            self.nodes.remove(&id);
            self.deps.remove(&id);
        }
    }

    /// Remove every node inside a closed namespace, in whatever state.
    pub fn remove_namespace(&mut self, closing: &NodeNamespace) {
        let doomed: Vec<NodeId> = self
            .nodes
            .keys()
            .filter(|id| id.namespace().is_within(closing))
            .cloned()
            .collect();
        for id in doomed {
            self.nodes.remove(&id);
            self.deps.remove(&id);
            self.pending.remove(&id);
            self.active.remove(&id);
            self.succeeded.remove(&id);
            self.failed.remove(&id);
        }
    }

    /// Resolve a completed result. Every error here is an internal engine
    /// bug, never an expected condition.
    pub fn lookup(&self, id: &NodeId) -> Result<Value, EngineError> {
        let Some(entry) = self.nodes.get(id) else {
            return Err(EngineError::UnknownNode { id: id.to_string() });
        };
        if entry.error().is_some() || self.failed.contains(id) {
            return Err(EngineError::FailedNode { id: id.to_string() });
        }
        let Some(result) = entry.result() else {
            return Err(EngineError::IncompleteNode { id: id.to_string() });
        };
        if !id.result_type().conforms(result) {
            return Err(EngineError::ResultTypeMismatch {
                id: id.to_string(),
                expected: id.result_type().to_string(),
            });
        }
        Ok(result.clone())
    }

    /// All currently succeeded results.
    pub fn iter_succeeded(&self) -> impl Iterator<Item = (&NodeId, &Value)> {
        self.succeeded.iter().filter_map(|id| {
            self.nodes
                .get(id)
                .and_then(|node| node.result().map(|value| (id, value)))
        })
    }

    /// `true` when every id in the node map is in exactly one state set.
    #[must_use]
    pub fn is_partitioned(&self) -> bool {
        self.nodes.keys().all(|id| {
            let hits = usize::from(self.pending.contains(id))
                + usize::from(self.active.contains(id))
                + usize::from(self.succeeded.contains(id))
                + usize::from(self.failed.contains(id));
            hits == 1
        }) && self.pending.len()
            + self.active.len()
            + self.succeeded.len()
            + self.failed.len()
            == self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(name: &str) -> NodeId {
        NodeId::rooted(name, ResultType::Any)
    }

    fn two_node_context() -> EngineContext {
        let a = Node::new(id("a"), NodeDetails::StaticValue { value: json!(1) });
        let b = Node::new(id("b"), NodeDetails::Identity { source: id("a") });
        let mut nodes = FxHashMap::default();
        nodes.insert(a.id().clone(), a);
        nodes.insert(b.id().clone(), b);
        EngineContext::from_graph(&Graph::new(nodes, id("b")))
    }

    #[test]
    fn state_transitions_preserve_partition() {
        let mut ctx = two_node_context();
        assert!(ctx.is_partitioned());
        assert_eq!(ctx.state_of(&id("a")), Some(NodeState::Pending));

        ctx.mark_active(&id("a"));
        assert!(ctx.is_partitioned());
        ctx.mark_succeeded(&id("a"), json!(1));
        assert!(ctx.is_partitioned());
        assert_eq!(ctx.state_of(&id("a")), Some(NodeState::Succeeded));

        ctx.mark_active(&id("b"));
        ctx.mark_failed(&id("b"), EngineError::execution("b", "boom"));
        assert!(ctx.is_partitioned());
        assert_eq!(ctx.state_of(&id("b")), Some(NodeState::Failed));
    }

    #[test]
    fn eviction_waits_for_dependents() {
        let mut ctx = two_node_context();
        ctx.mark_active(&id("a"));
        ctx.mark_succeeded(&id("a"), json!(1));

        // b is still pending and depends on a.
        ctx.evict_stale();
        assert!(ctx.contains(&id("a")));

        ctx.mark_active(&id("b"));
        ctx.evict_stale();
        assert!(!ctx.contains(&id("a")));
        assert!(ctx.is_partitioned());
    }

    #[test]
    fn root_is_never_evicted() {
        let mut ctx = two_node_context();
        ctx.mark_active(&id("a"));
        ctx.mark_succeeded(&id("a"), json!(1));
        ctx.mark_active(&id("b"));
        ctx.mark_succeeded(&id("b"), json!(1));
        ctx.evict_stale();
        assert!(ctx.contains(&id("b")));
    }

    #[test]
    fn lookup_diagnoses_every_misuse() {
        let mut ctx = two_node_context();
        assert!(matches!(
            ctx.lookup(&id("missing")),
            Err(EngineError::UnknownNode { .. })
        ));
        assert!(matches!(
            ctx.lookup(&id("a")),
            Err(EngineError::IncompleteNode { .. })
        ));

        ctx.mark_failed(&id("a"), EngineError::execution("a", "boom"));
        assert!(matches!(
            ctx.lookup(&id("a")),
            Err(EngineError::FailedNode { .. })
        ));

        ctx.mark_succeeded(&id("b"), json!("text"));
        let as_int = id("b").with_result_type(ResultType::Integer);
        assert!(matches!(
            ctx.lookup(&as_int),
            Err(EngineError::ResultTypeMismatch { .. })
        ));
    }

    #[test]
    fn namespace_removal_clears_every_set() {
        let ns = NodeNamespace::root().push("inner");
        let inner = NodeId::new("x", ns.clone(), ResultType::Any);
        let mut ctx = two_node_context();
        ctx.insert_pending(Node::new(
            inner.clone(),
            NodeDetails::StaticValue { value: json!(0) },
        ));
        assert!(ctx.contains(&inner));
        ctx.remove_namespace(&ns);
        assert!(!ctx.contains(&inner));
        assert!(ctx.is_partitioned());
    }
}
