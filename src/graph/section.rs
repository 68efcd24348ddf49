//! Finished graphs and builder-time sections.
//!
//! A [`Graph`] is the immutable product of job compilation: the complete
//! node map plus the root id whose result is the job's result. A
//! [`GraphSection`] is the builder-only intermediate used to assemble a
//! graph piecewise: a bag of nodes plus the ids the section requires from
//! earlier sections and the ids it offers to later ones.

use rustc_hash::{FxHashMap, FxHashSet};

use super::ids::NodeId;
use super::node::Node;

/// An immutable, fully wired execution graph.
#[derive(Clone, Debug)]
pub struct Graph {
    nodes: FxHashMap<NodeId, Node>,
    root: NodeId,
}

impl Graph {
    #[must_use]
    pub fn new(nodes: FxHashMap<NodeId, Node>, root: NodeId) -> Self {
        Self { nodes, root }
    }

    #[must_use]
    pub fn nodes(&self) -> &FxHashMap<NodeId, Node> {
        &self.nodes
    }

    /// The node whose result is reported as the job result.
    #[must_use]
    pub fn root(&self) -> &NodeId {
        &self.root
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }
}

/// Builder-time fragment of a graph.
///
/// Sections are joined in dependency order; the join checks that every id a
/// section declares as input is already present among previously joined
/// nodes (see the builder's `join_sections`).
#[derive(Clone, Debug, Default)]
pub struct GraphSection {
    /// Nodes this section contributes.
    pub nodes: FxHashMap<NodeId, Node>,
    /// Ids this section requires to exist before it can be joined.
    pub inputs: FxHashSet<NodeId>,
    /// Ids this section makes available to later sections.
    pub outputs: FxHashSet<NodeId>,
    /// Ids that must execute even if nothing downstream consumes them
    /// (e.g. save nodes).
    pub must_run: Vec<NodeId>,
}

impl GraphSection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, deriving no input requirements.
    pub fn add_node(&mut self, node: Node) {
        self.nodes.insert(node.id().clone(), node);
    }

    /// Declare an id this section expects earlier sections to provide.
    pub fn require(&mut self, id: NodeId) {
        self.inputs.insert(id);
    }

    /// Declare an id later sections may consume.
    pub fn provide(&mut self, id: NodeId) {
        self.outputs.insert(id);
    }
}
