//! Engine error taxonomy.
//!
//! Three families matter at runtime: *internal* errors are violated
//! scheduler invariants, never expected and always fatal to the job;
//! *execution* errors come from a node's own logic and stay local to the
//! graph until the termination check aggregates them; *validation* errors
//! are produced by the builder before anything runs and live in
//! [`crate::builder::validation`]. Bad-actor errors are raised at the send
//! site by the actor runtime and never travel through the graph.
//!
//! Errors ride inside completion messages and failure signals, so every
//! variant here is clonable.

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Clone, Error, Diagnostic)]
pub enum EngineError {
    /// A node id was referenced that is not in the live graph.
    #[error("unknown node referenced: {id}")]
    #[diagnostic(code(weft::engine::unknown_node))]
    UnknownNode { id: String },

    /// A result was requested from a node that has not completed.
    #[error("node {id} has not completed; its result is unavailable")]
    #[diagnostic(code(weft::engine::incomplete_node))]
    IncompleteNode { id: String },

    /// A result was requested from a node that failed.
    #[error("node {id} failed; its result is unavailable")]
    #[diagnostic(code(weft::engine::failed_node))]
    FailedNode { id: String },

    /// An execution result did not conform to the node's declared type.
    #[error("node {id} produced a result that is not a {expected}")]
    #[diagnostic(code(weft::engine::result_type))]
    ResultTypeMismatch { id: String, expected: String },

    /// A dynamic graph update proposed an id that already exists.
    #[error("graph update from {origin} collides with existing node {id}")]
    #[diagnostic(code(weft::engine::update_collision))]
    UpdateCollision { origin: String, id: String },

    /// A dynamic graph update proposed an invalid dependency edge.
    #[error("graph update from {origin} has a bad edge: {detail}")]
    #[diagnostic(code(weft::engine::update_edge))]
    UpdateBadEdge { origin: String, detail: String },

    /// Nodes remain pending with nothing active: an unsatisfiable or
    /// cyclic dependency.
    #[error("graph deadlock: {count} node(s) pending with nothing active, first: {first}")]
    #[diagnostic(
        code(weft::engine::deadlock),
        help("Some pending node has a dependency that can never be satisfied.")
    )]
    Deadlock { count: usize, first: String },

    /// A node was never dispatched because a non-tolerant dependency
    /// failed first.
    #[error("node {id} skipped: upstream failure of {dependency}")]
    #[diagnostic(code(weft::engine::upstream_failure))]
    UpstreamFailure { id: String, dependency: String },

    /// No executable could be resolved for a node.
    #[error("no executable function for node {id}: {detail}")]
    #[diagnostic(code(weft::engine::unresolved_function))]
    UnresolvedFunction { id: String, detail: String },

    /// A collaborator required by a node variant is not installed.
    #[error("node {id} needs a {collaborator} collaborator and none is installed")]
    #[diagnostic(code(weft::engine::missing_collaborator))]
    MissingCollaborator {
        id: String,
        collaborator: &'static str,
    },

    /// A failure raised by the node's own logic (model code, I/O).
    #[error("node {node} failed: {message}")]
    #[diagnostic(code(weft::engine::execution))]
    Execution { node: String, message: String },

    /// A job failed in more than one place.
    #[error("job failed with {} errors", related.len())]
    #[diagnostic(code(weft::engine::multiple))]
    Multiple {
        #[related]
        related: Vec<EngineError>,
    },
}

impl EngineError {
    /// Capture a domain failure raised by a node's executable logic.
    #[must_use]
    pub fn execution(node: impl std::fmt::Display, error: impl std::fmt::Display) -> Self {
        EngineError::Execution {
            node: node.to_string(),
            message: error.to_string(),
        }
    }

    /// Fold recorded node errors into the single job failure: the one
    /// error directly when alone, an aggregate otherwise.
    #[must_use]
    pub fn aggregate(mut errors: Vec<EngineError>) -> Self {
        if errors.len() == 1 {
            errors.remove(0)
        } else {
            EngineError::Multiple { related: errors }
        }
    }

    /// `true` for the internal family: a violated engine invariant rather
    /// than a failure of the node's own logic.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        !matches!(
            self,
            EngineError::Execution { .. } | EngineError::Multiple { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_unwraps_single_error() {
        let single = EngineError::aggregate(vec![EngineError::execution("n", "boom")]);
        assert!(matches!(single, EngineError::Execution { .. }));

        let multi = EngineError::aggregate(vec![
            EngineError::execution("a", "x"),
            EngineError::execution("b", "y"),
        ]);
        assert!(matches!(multi, EngineError::Multiple { related } if related.len() == 2));
    }

    #[test]
    fn families() {
        assert!(EngineError::Deadlock {
            count: 1,
            first: "n".into()
        }
        .is_internal());
        assert!(!EngineError::execution("n", "boom").is_internal());
    }
}
