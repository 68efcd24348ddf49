//! Graph node variants and dependency derivation.
//!
//! A [`Node`] is a closed tagged variant: identity plus a [`NodeDetails`]
//! payload describing what the node does, an optional bundle declaration,
//! and any explicitly attached dependencies. The dependency set of a node is
//! computed by the pure [`Node::dependencies`] function from the variant's
//! own fields; nothing is implicit.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::meta::{ModelDefinition, ObjectSelector};

use super::deps::DependencyType;
use super::ids::{NodeId, NodeNamespace};
use super::section::Graph;

/// Scheduling category of a node, used to select the event-loop pool its
/// processor runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeCategory {
    Model,
    Data,
    ChildJob,
    General,
}

/// Behavior payload of a graph node.
#[derive(Clone, Debug)]
pub enum NodeDetails {
    /// Holds a literal value known at build time (parameters, constants).
    StaticValue { value: Value },
    /// Passes through another node's result unchanged.
    Identity { source: NodeId },
    /// Extracts one key from a map-valued result.
    KeyedItem { source: NodeId, key: String },
    /// Extracts one item of a bundle result (a keyed collection).
    BundleItem { source: NodeId, key: String },
    /// Namespace entry: maps selected outer results into inner-namespace
    /// identities. The result is a keyed collection of the mapped values.
    ContextPush {
        /// Outer source id paired with the inner name it maps to.
        mapping: Vec<(NodeId, String)>,
    },
    /// Namespace exit: maps inner results back out. Once a pop node
    /// completes, every node inside the closed namespace becomes eligible
    /// for removal.
    ContextPop {
        /// Inner source id paired with the outer name it maps to.
        mapping: Vec<(NodeId, String)>,
        /// The namespace this pop closes.
        closing: NodeNamespace,
    },
    /// Builds the storage specification consumed by load/save nodes.
    DataSpec { spec: Value },
    /// Loads data through the storage collaborator.
    LoadData { spec: NodeId },
    /// Saves a result through the storage collaborator.
    SaveData { source: NodeId, spec: NodeId },
    /// Read-only projection over loaded data.
    DataView { source: NodeId },
    /// One item of a loaded dataset.
    DataItem { source: NodeId, key: String },
    /// Checks out a model package through the model-loading collaborator.
    ImportModel { selector: ObjectSelector },
    /// Runs a model: gathers parameter/input values from the sockets and
    /// invokes the model-runner collaborator.
    RunModel {
        model: Arc<ModelDefinition>,
        /// The context-push node that opened this model's namespace.
        push: NodeId,
        /// Parameter/input name to the inner node supplying its value.
        sockets: FxHashMap<String, NodeId>,
    },
    /// Collects named outputs into the job's result map.
    JobResult { outputs: FxHashMap<String, NodeId> },
    /// Collects outputs discovered at runtime; its dependency set grows
    /// through dynamic graph updates.
    DynamicOutputs { model: NodeId },
    /// Wraps a fully pre-built sub-graph, executed by the engine as an
    /// independently monitored child job.
    ChildJob {
        graph: Arc<Graph>,
        /// Predecessors in a sequential job group.
        after: Vec<NodeId>,
    },
}

/// One unit of work in an execution graph.
#[derive(Clone, Debug)]
pub struct Node {
    id: NodeId,
    details: NodeDetails,
    /// When set, the node's result is a keyed collection whose items are
    /// materialized as individually addressable nodes in this namespace.
    bundle: Option<NodeNamespace>,
    /// Dependencies attached on top of the derived set.
    explicit_deps: FxHashMap<NodeId, DependencyType>,
}

impl Node {
    #[must_use]
    pub fn new(id: NodeId, details: NodeDetails) -> Self {
        Self {
            id,
            details,
            bundle: None,
            explicit_deps: FxHashMap::default(),
        }
    }

    /// Declare this node's result as a bundle materialized into `namespace`.
    #[must_use]
    pub fn as_bundle(mut self, namespace: NodeNamespace) -> Self {
        self.bundle = Some(namespace);
        self
    }

    /// Attach a dependency beyond the derived set.
    #[must_use]
    pub fn with_dependency(mut self, id: NodeId, dep_type: DependencyType) -> Self {
        self.explicit_deps.insert(id, dep_type);
        self
    }

    #[must_use]
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    #[must_use]
    pub fn details(&self) -> &NodeDetails {
        &self.details
    }

    #[must_use]
    pub fn bundle(&self) -> Option<&NodeNamespace> {
        self.bundle.as_ref()
    }

    /// Pool-selection category, derived from the variant.
    #[must_use]
    pub fn category(&self) -> NodeCategory {
        match &self.details {
            NodeDetails::ImportModel { .. } | NodeDetails::RunModel { .. } => NodeCategory::Model,
            NodeDetails::DataSpec { .. }
            | NodeDetails::LoadData { .. }
            | NodeDetails::SaveData { .. }
            | NodeDetails::DataView { .. }
            | NodeDetails::DataItem { .. } => NodeCategory::Data,
            NodeDetails::ChildJob { .. } => NodeCategory::ChildJob,
            _ => NodeCategory::General,
        }
    }

    /// Compute this node's dependency map from its variant fields.
    ///
    /// Pure and total: the builder calls this once per node when a graph
    /// section is assembled, and the engine calls it again when the node
    /// enters a live graph.
    #[must_use]
    pub fn dependencies(&self) -> FxHashMap<NodeId, DependencyType> {
        let mut deps: FxHashMap<NodeId, DependencyType> = FxHashMap::default();
        match &self.details {
            NodeDetails::StaticValue { .. }
            | NodeDetails::DataSpec { .. }
            | NodeDetails::ImportModel { .. } => {}
            NodeDetails::Identity { source }
            | NodeDetails::KeyedItem { source, .. }
            | NodeDetails::BundleItem { source, .. }
            | NodeDetails::DataView { source }
            | NodeDetails::DataItem { source, .. } => {
                deps.insert(source.clone(), DependencyType::HARD);
            }
            NodeDetails::ContextPush { mapping } => {
                for (outer, _) in mapping {
                    deps.insert(outer.clone(), DependencyType::HARD);
                }
            }
            NodeDetails::ContextPop { mapping, .. } => {
                for (inner, _) in mapping {
                    deps.insert(inner.clone(), DependencyType::HARD);
                }
            }
            NodeDetails::LoadData { spec } => {
                deps.insert(spec.clone(), DependencyType::HARD);
            }
            NodeDetails::SaveData { source, spec } => {
                deps.insert(source.clone(), DependencyType::HARD);
                deps.insert(spec.clone(), DependencyType::HARD);
            }
            NodeDetails::RunModel { push, sockets, .. } => {
                deps.insert(push.clone(), DependencyType::HARD);
                for socket in sockets.values() {
                    deps.insert(socket.clone(), DependencyType::HARD);
                }
            }
            NodeDetails::JobResult { outputs } => {
                for output in outputs.values() {
                    deps.insert(output.clone(), DependencyType::HARD);
                }
            }
            NodeDetails::DynamicOutputs { model } => {
                deps.insert(model.clone(), DependencyType::HARD);
            }
            NodeDetails::ChildJob { after, .. } => {
                for predecessor in after {
                    deps.insert(predecessor.clone(), DependencyType::HARD);
                }
            }
        }
        for (id, dep_type) in &self.explicit_deps {
            deps.insert(id.clone(), *dep_type);
        }
        deps
    }
}
