//! Joining graph sections.

use rustc_hash::FxHashSet;

use crate::graph::{GraphSection, NodeId};

use super::validation::{Problems, ValidationIssue};

/// How strictly a join checks section inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum JoinMode {
    /// Every section's declared inputs must already be present among
    /// previously joined nodes.
    Strict,
    /// Unmet inputs are carried forward as inputs of the joined section.
    /// Used only while assembling a flow, where nodes arrive in
    /// topological rather than join order.
    Partial,
}

/// Merge sections in order, checking that each section's declared inputs
/// are satisfied by nodes joined before it. Missing inputs are recorded as
/// validation issues in strict mode; the merge itself always completes so
/// later checks still run over the full node map.
pub(crate) fn join_sections(
    sections: Vec<GraphSection>,
    mode: JoinMode,
    problems: &mut Problems,
) -> GraphSection {
    let mut joined = GraphSection::new();
    let mut unmet: FxHashSet<NodeId> = FxHashSet::default();

    for section in sections {
        for input in &section.inputs {
            if !joined.nodes.contains_key(input) {
                match mode {
                    JoinMode::Strict => {
                        problems.push(ValidationIssue::UnsatisfiedSectionInput {
                            id: input.to_string(),
                        });
                    }
                    JoinMode::Partial => {
                        unmet.insert(input.clone());
                    }
                }
            }
        }
        for (id, node) in section.nodes {
            unmet.remove(&id);
            joined.nodes.insert(id, node);
        }
        joined.outputs.extend(section.outputs);
        joined.must_run.extend(section.must_run);
    }

    // Inputs that later sections of a partial join also failed to provide
    // remain requirements of the joined whole.
    joined.inputs = unmet;
    joined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Node, NodeDetails, ResultType};
    use serde_json::json;

    fn value_section(name: &str) -> GraphSection {
        let mut section = GraphSection::new();
        let id = NodeId::rooted(name, ResultType::Any);
        section.add_node(Node::new(
            id.clone(),
            NodeDetails::StaticValue { value: json!(1) },
        ));
        section.provide(id);
        section
    }

    fn consumer_section(name: &str, source: &str) -> GraphSection {
        let mut section = GraphSection::new();
        let source = NodeId::rooted(source, ResultType::Any);
        let id = NodeId::rooted(name, ResultType::Any);
        section.add_node(Node::new(
            id.clone(),
            NodeDetails::Identity {
                source: source.clone(),
            },
        ));
        section.require(source);
        section.provide(id);
        section
    }

    #[test]
    fn strict_join_flags_missing_inputs() {
        let mut problems = Problems::new();
        join_sections(
            vec![consumer_section("b", "a")],
            JoinMode::Strict,
            &mut problems,
        );
        assert!(!problems.is_empty());
    }

    #[test]
    fn strict_join_accepts_satisfied_inputs() {
        let mut problems = Problems::new();
        let joined = join_sections(
            vec![value_section("a"), consumer_section("b", "a")],
            JoinMode::Strict,
            &mut problems,
        );
        assert!(problems.is_empty());
        assert_eq!(joined.nodes.len(), 2);
    }

    #[test]
    fn partial_join_carries_unmet_inputs_forward() {
        let mut problems = Problems::new();
        let joined = join_sections(
            vec![consumer_section("b", "a")],
            JoinMode::Partial,
            &mut problems,
        );
        assert!(problems.is_empty());
        assert_eq!(joined.inputs.len(), 1);

        // The same sections in provider-late order still resolve.
        let mut problems = Problems::new();
        let joined = join_sections(
            vec![consumer_section("b", "a"), value_section("a")],
            JoinMode::Partial,
            &mut problems,
        );
        assert!(problems.is_empty());
        assert!(joined.inputs.is_empty());
    }
}
