//! Accumulated job validation errors.
//!
//! The builder never stops at the first problem: every issue found across
//! the whole build is collected and reported as one aggregate failure, so a
//! bad job definition surfaces all of its problems at once, before any node
//! is ever dispatched.

use miette::Diagnostic;
use thiserror::Error;

use crate::meta::MetadataError;

/// One problem found while compiling a job definition.
#[derive(Debug, Clone, Error, Diagnostic, PartialEq, Eq)]
pub enum ValidationIssue {
    #[error("model {model}: required parameter '{name}' is not supplied")]
    #[diagnostic(code(weft::validation::missing_parameter))]
    MissingParameter { model: String, name: String },

    #[error("model {model}: required input '{name}' is not supplied")]
    #[diagnostic(code(weft::validation::missing_input))]
    MissingInput { model: String, name: String },

    #[error("flow {flow}: node '{node}' has no model assigned")]
    #[diagnostic(code(weft::validation::unassigned_model))]
    UnassignedModel { flow: String, node: String },

    #[error("flow {flow}: model assigned to node '{node}' does not match: {detail}")]
    #[diagnostic(
        code(weft::validation::signature_mismatch),
        help("The assigned model must declare exactly the parameters, inputs and outputs the flow node lists.")
    )]
    SignatureMismatch {
        flow: String,
        node: String,
        detail: String,
    },

    #[error("flow {flow}: socket {target} has no source wired to it")]
    #[diagnostic(code(weft::validation::missing_source))]
    MissingSource { flow: String, target: String },

    #[error("flow {flow}: socket {target} has {count} sources wired to it")]
    #[diagnostic(code(weft::validation::duplicate_source))]
    DuplicateSource {
        flow: String,
        target: String,
        count: usize,
    },

    #[error("flow {flow}: type of '{node}' cannot be inferred: {detail}")]
    #[diagnostic(code(weft::validation::untyped_socket))]
    UntypedSocket {
        flow: String,
        node: String,
        detail: String,
    },

    #[error("flow {flow}: nodes never became reachable: {nodes:?}")]
    #[diagnostic(
        code(weft::validation::unreachable_nodes),
        help("A cycle or a wire from a nonexistent node leaves these targets unresolved.")
    )]
    UnreachableNodes { flow: String, nodes: Vec<String> },

    #[error("flow {flow}: edge references unknown node '{node}'")]
    #[diagnostic(code(weft::validation::unknown_flow_node))]
    UnknownFlowNode { flow: String, node: String },

    #[error("graph section requires node {id} which no earlier section provides")]
    #[diagnostic(code(weft::validation::unsatisfied_section_input))]
    UnsatisfiedSectionInput { id: String },

    #[error("metadata resolution failed: {message}")]
    #[diagnostic(code(weft::validation::metadata))]
    Metadata { message: String },
}

impl From<MetadataError> for ValidationIssue {
    fn from(error: MetadataError) -> Self {
        ValidationIssue::Metadata {
            message: error.to_string(),
        }
    }
}

/// Aggregate failure listing every problem found across the build.
#[derive(Debug, Clone, Error, Diagnostic)]
#[error("job validation failed with {} problem(s)", issues.len())]
#[diagnostic(code(weft::validation::job))]
pub struct JobValidationError {
    #[related]
    pub issues: Vec<ValidationIssue>,
}

impl JobValidationError {
    #[must_use]
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }
}

/// Issue accumulator threaded through the whole build.
#[derive(Debug, Default)]
pub(crate) struct Problems {
    issues: Vec<ValidationIssue>,
}

impl Problems {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    pub(crate) fn extend(&mut self, issues: impl IntoIterator<Item = ValidationIssue>) {
        self.issues.extend(issues);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Succeed with `value` only when nothing was recorded.
    pub(crate) fn finish<T>(self, value: T) -> Result<T, JobValidationError> {
        if self.issues.is_empty() {
            Ok(value)
        } else {
            Err(JobValidationError::new(self.issues))
        }
    }
}
