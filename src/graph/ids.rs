//! Node identity and hierarchical namespaces.
//!
//! Every node in an execution graph is addressed by a [`NodeId`]: a name
//! scoped inside a [`NodeNamespace`]. Namespaces form a chain so that
//! repeated invocations of the same model or flow never collide on node
//! names (a model's `input_a` exists once per invocation, each in its own
//! namespace).
//!
//! # Examples
//!
//! ```
//! use weft::graph::{NodeId, NodeNamespace, ResultType};
//!
//! let root = NodeNamespace::root();
//! let flow = root.push("flow-0");
//! let model = flow.push("model_a");
//!
//! let id = NodeId::new("input_a", model.clone(), ResultType::Any);
//! assert_eq!(id.namespace().parent(), Some(flow));
//! assert_eq!(id.to_string(), "flow-0/model_a/input_a");
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::types::ResultType;

/// Hierarchical scope for node names.
///
/// A namespace is an immutable chain of segments; the root namespace is the
/// unique empty chain. Cloning is cheap (the segment list is shared).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeNamespace {
    segments: Arc<Vec<String>>,
}

impl NodeNamespace {
    /// The root namespace: the unique sentinel with no parent.
    #[must_use]
    pub fn root() -> Self {
        Self {
            segments: Arc::new(Vec::new()),
        }
    }

    /// Create a child namespace nested inside this one.
    #[must_use]
    pub fn push(&self, name: impl Into<String>) -> Self {
        let mut segments = (*self.segments).clone();
        segments.push(name.into());
        Self {
            segments: Arc::new(segments),
        }
    }

    /// The enclosing namespace, or `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        let mut segments = (*self.segments).clone();
        segments.pop();
        Some(Self {
            segments: Arc::new(segments),
        })
    }

    /// Name of the innermost segment, or `None` for the root.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Nesting depth; the root has depth 0.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// `true` if `self` equals `other` or is nested anywhere inside it.
    ///
    /// Used when a closed namespace is pruned: every node whose namespace is
    /// enclosed by the closed one is removed together.
    #[must_use]
    pub fn is_within(&self, other: &NodeNamespace) -> bool {
        self.segments.len() >= other.segments.len()
            && self.segments[..other.segments.len()] == other.segments[..]
    }
}

impl fmt::Display for NodeNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            write!(f, "/")
        } else {
            write!(f, "{}", self.segments.join("/"))
        }
    }
}

/// Identity of one node in an execution graph.
///
/// Two `NodeId`s are equal iff their name and namespace match. The declared
/// result type is carried for conformance checking but is metadata only; it
/// never participates in equality or hashing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeId {
    name: String,
    namespace: NodeNamespace,
    result_type: ResultType,
}

impl NodeId {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        namespace: NodeNamespace,
        result_type: ResultType,
    ) -> Self {
        Self {
            name: name.into(),
            namespace,
            result_type,
        }
    }

    /// Shorthand for an id in the root namespace.
    #[must_use]
    pub fn rooted(name: impl Into<String>, result_type: ResultType) -> Self {
        Self::new(name, NodeNamespace::root(), result_type)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn namespace(&self) -> &NodeNamespace {
        &self.namespace
    }

    /// Declared result type (identity metadata, not part of equality).
    #[must_use]
    pub fn result_type(&self) -> &ResultType {
        &self.result_type
    }

    /// The same identity with a different declared result type.
    #[must_use]
    pub fn with_result_type(&self, result_type: ResultType) -> Self {
        Self {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            result_type,
        }
    }
}

impl PartialEq for NodeId {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.namespace == other.namespace
    }
}

impl Eq for NodeId {}

impl Hash for NodeId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.namespace.hash(state);
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_root() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_parent_chain() {
        let root = NodeNamespace::root();
        assert!(root.is_root());
        assert_eq!(root.parent(), None);

        let a = root.push("a");
        let b = a.push("b");
        assert_eq!(b.parent(), Some(a.clone()));
        assert_eq!(a.parent(), Some(root.clone()));
        assert_eq!(b.name(), Some("b"));
        assert_eq!(b.depth(), 2);
    }

    #[test]
    fn namespace_enclosure() {
        let root = NodeNamespace::root();
        let a = root.push("a");
        let ab = a.push("b");
        let c = root.push("c");

        assert!(ab.is_within(&a));
        assert!(ab.is_within(&root));
        assert!(a.is_within(&a));
        assert!(!a.is_within(&ab));
        assert!(!c.is_within(&a));
    }

    #[test]
    fn node_id_equality_ignores_result_type() {
        let ns = NodeNamespace::root().push("m");
        let a = NodeId::new("x", ns.clone(), ResultType::Integer);
        let b = NodeId::new("x", ns.clone(), ResultType::Str);
        let c = NodeId::new("x", NodeNamespace::root(), ResultType::Integer);

        assert_eq!(a, b);
        assert_ne!(a, c);

        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut ha = DefaultHasher::new();
        let mut hb = DefaultHasher::new();
        a.hash(&mut ha);
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }
}
