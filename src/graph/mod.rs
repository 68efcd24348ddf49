//! Execution graph data model.
//!
//! The types in this module describe *what a compiled job is*: typed node
//! identities scoped by hierarchical namespaces ([`ids`]), dependency edge
//! semantics ([`deps`]), the closed set of node variants ([`node`]), result
//! type declarations ([`types`]), and the finished [`Graph`] plus the
//! builder-time [`GraphSection`] intermediate ([`section`]).
//!
//! This module depends on nothing else in the engine; the builder and the
//! graph processor are both written against it.

pub mod deps;
pub mod ids;
pub mod node;
pub mod section;
pub mod types;

pub use deps::DependencyType;
pub use ids::{NodeId, NodeNamespace};
pub use node::{Node, NodeCategory, NodeDetails};
pub use section::{Graph, GraphSection};
pub use types::ResultType;
