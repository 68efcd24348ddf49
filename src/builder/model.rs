//! Wiring of one model invocation.
//!
//! A model always executes inside a freshly named child namespace: a
//! context-push node maps the outer argument values in, bundle-item nodes
//! give each socket an addressable inner identity, the run-model node
//! consumes the sockets, and one bundle-item node per declared output makes
//! the results addressable. The caller decides how the namespace is closed:
//! a top-level job puts its job-result node inside before popping, while a
//! flow pops the outputs straight out (see [`pop_outputs`]).

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::graph::{
    DependencyType, GraphSection, Node, NodeDetails, NodeId, NodeNamespace, ResultType,
};
use crate::meta::ModelDefinition;

use super::validation::{Problems, ValidationIssue};

/// The open (not yet popped) subgraph of one sub-invocation.
pub(crate) struct SubInvocation {
    pub section: GraphSection,
    pub namespace: NodeNamespace,
    /// Inner bundle-item ids of the declared outputs.
    pub outputs: FxHashMap<String, NodeId>,
}

/// Build push, sockets and the run-model node for one invocation.
///
/// `parameter_sources` and `input_sources` give the outer id supplying each
/// socket; missing required sockets are recorded as validation issues and
/// an optional parameter with a declared default gets a synthesized static
/// node instead of a push mapping.
pub(crate) fn invoke_model(
    parent_ns: &NodeNamespace,
    invocation: &str,
    model: &Arc<ModelDefinition>,
    parameter_sources: &FxHashMap<String, NodeId>,
    input_sources: &FxHashMap<String, NodeId>,
    problems: &mut Problems,
) -> SubInvocation {
    let namespace = parent_ns.push(invocation);
    let mut section = GraphSection::new();

    let push_id = NodeId::new(
        format!("{invocation}:push"),
        parent_ns.clone(),
        ResultType::map_of(ResultType::Any),
    );

    let mut mapping: Vec<(NodeId, String)> = Vec::new();
    let mut sockets: FxHashMap<String, NodeId> = FxHashMap::default();
    let mut defaults: Vec<(String, Value, ResultType)> = Vec::new();

    for (name, spec) in &model.parameters {
        match parameter_sources.get(name) {
            Some(outer) => {
                section.require(outer.clone());
                mapping.push((outer.clone(), name.clone()));
                let inner = NodeId::new(name.clone(), namespace.clone(), spec.param_type.clone());
                sockets.insert(name.clone(), inner);
            }
            None => match (&spec.default, spec.optional) {
                (Some(default), _) => {
                    defaults.push((name.clone(), default.clone(), spec.param_type.clone()));
                }
                (None, true) => {}
                (None, false) => {
                    problems.push(ValidationIssue::MissingParameter {
                        model: model.key.clone(),
                        name: name.clone(),
                    });
                }
            },
        }
    }

    for (name, spec) in &model.inputs {
        match input_sources.get(name) {
            Some(outer) => {
                section.require(outer.clone());
                mapping.push((outer.clone(), name.clone()));
                let inner = NodeId::new(name.clone(), namespace.clone(), spec.socket_type.clone());
                sockets.insert(name.clone(), inner);
            }
            None if spec.optional => {}
            None => {
                problems.push(ValidationIssue::MissingInput {
                    model: model.key.clone(),
                    name: name.clone(),
                });
            }
        }
    }

    // Deterministic push mapping regardless of hash order.
    mapping.sort_by(|a, b| a.1.cmp(&b.1));

    section.add_node(Node::new(
        push_id.clone(),
        NodeDetails::ContextPush { mapping },
    ));

    for socket in sockets.values() {
        section.add_node(Node::new(
            socket.clone(),
            NodeDetails::BundleItem {
                source: push_id.clone(),
                key: socket.name().to_string(),
            },
        ));
    }
    for (name, default, param_type) in defaults {
        let inner = NodeId::new(name.clone(), namespace.clone(), param_type);
        section.add_node(Node::new(
            inner.clone(),
            NodeDetails::StaticValue { value: default },
        ));
        sockets.insert(name, inner);
    }

    let model_id = NodeId::new(
        "model",
        namespace.clone(),
        ResultType::map_of(ResultType::Any),
    );
    section.add_node(Node::new(
        model_id.clone(),
        NodeDetails::RunModel {
            model: Arc::clone(model),
            push: push_id.clone(),
            sockets,
        },
    ));

    let mut outputs = FxHashMap::default();
    for (name, spec) in &model.outputs {
        let item = NodeId::new(name.clone(), namespace.clone(), spec.socket_type.clone());
        section.add_node(Node::new(
            item.clone(),
            NodeDetails::BundleItem {
                source: model_id.clone(),
                key: name.clone(),
            },
        ));
        section.provide(item.clone());
        outputs.insert(name.clone(), item);
    }

    if model.dynamic_outputs {
        // Collects outputs only discovered at runtime; its dependency set
        // grows through dynamic graph updates from the run-model node.
        let dynamic = NodeId::new(
            "dynamic",
            namespace.clone(),
            ResultType::map_of(ResultType::Any),
        );
        section.add_node(Node::new(
            dynamic.clone(),
            NodeDetails::DynamicOutputs {
                model: model_id.clone(),
            },
        ));
        section.provide(dynamic.clone());
        outputs.insert("dynamic".to_string(), dynamic);
    }

    SubInvocation {
        section,
        namespace,
        outputs,
    }
}

/// Close a sub-invocation by popping every declared output back out.
///
/// Returns the pop section and the outer id now supplying each output,
/// named `{invocation}:{output}` in the parent namespace.
pub(crate) fn pop_outputs(
    parent_ns: &NodeNamespace,
    invocation: &str,
    sub: &SubInvocation,
) -> (GraphSection, FxHashMap<String, NodeId>) {
    let mut section = GraphSection::new();

    let mut mapping: Vec<(NodeId, String)> = sub
        .outputs
        .iter()
        .map(|(name, inner)| (inner.clone(), name.clone()))
        .collect();
    mapping.sort_by(|a, b| a.1.cmp(&b.1));

    let pop_id = NodeId::new(
        format!("{invocation}:pop"),
        parent_ns.clone(),
        ResultType::map_of(ResultType::Any),
    );
    section.add_node(Node::new(
        pop_id.clone(),
        NodeDetails::ContextPop {
            mapping,
            closing: sub.namespace.clone(),
        },
    ));

    let mut outer = FxHashMap::default();
    for (name, inner) in &sub.outputs {
        let id = NodeId::new(
            format!("{invocation}:{name}"),
            parent_ns.clone(),
            inner.result_type().clone(),
        );
        section.add_node(Node::new(
            id.clone(),
            NodeDetails::KeyedItem {
                source: pop_id.clone(),
                key: name.clone(),
            },
        ));
        section.provide(id.clone());
        outer.insert(name.clone(), id);
    }

    (section, outer)
}

/// Build the outer argument nodes for a top-level invocation: a static node
/// per supplied parameter and a spec plus load pair per input, all in
/// `parent_ns`.
pub(crate) fn argument_sections(
    parent_ns: &NodeNamespace,
    parameters: &FxHashMap<String, Value>,
    inputs: &FxHashMap<String, Value>,
) -> (GraphSection, FxHashMap<String, NodeId>, FxHashMap<String, NodeId>) {
    let mut section = GraphSection::new();

    let mut parameter_ids = FxHashMap::default();
    for (name, value) in parameters {
        let id = NodeId::new(format!("param:{name}"), parent_ns.clone(), ResultType::Any);
        section.add_node(Node::new(
            id.clone(),
            NodeDetails::StaticValue {
                value: value.clone(),
            },
        ));
        section.provide(id.clone());
        parameter_ids.insert(name.clone(), id);
    }

    let mut input_ids = FxHashMap::default();
    for (name, spec) in inputs {
        let spec_id = NodeId::new(
            format!("input:{name}:spec"),
            parent_ns.clone(),
            ResultType::Any,
        );
        section.add_node(Node::new(
            spec_id.clone(),
            NodeDetails::DataSpec { spec: spec.clone() },
        ));
        let load_id = NodeId::new(format!("input:{name}"), parent_ns.clone(), ResultType::Any);
        section.add_node(Node::new(
            load_id.clone(),
            NodeDetails::LoadData {
                spec: spec_id.clone(),
            },
        ));
        section.provide(load_id.clone());
        input_ids.insert(name.clone(), load_id);
    }

    (section, parameter_ids, input_ids)
}

/// Build save nodes inside `namespace` for each requested output and wire
/// them so the namespace cannot be popped before they run.
pub(crate) fn save_sections(
    namespace: &NodeNamespace,
    output_specs: &FxHashMap<String, Value>,
    produced: &FxHashMap<String, NodeId>,
    model_key: &str,
    problems: &mut Problems,
) -> (GraphSection, Vec<NodeId>) {
    let mut section = GraphSection::new();
    let mut saves = Vec::new();

    for (name, spec) in output_specs {
        let Some(source) = produced.get(name) else {
            problems.push(ValidationIssue::MissingInput {
                model: model_key.to_string(),
                name: format!("output '{name}' to save"),
            });
            continue;
        };
        let spec_id = NodeId::new(
            format!("save:{name}:spec"),
            namespace.clone(),
            ResultType::Any,
        );
        section.add_node(Node::new(
            spec_id.clone(),
            NodeDetails::DataSpec { spec: spec.clone() },
        ));
        let save_id = NodeId::new(format!("save:{name}"), namespace.clone(), ResultType::Any);
        section.add_node(Node::new(
            save_id.clone(),
            NodeDetails::SaveData {
                source: source.clone(),
                spec: spec_id,
            },
        ));
        section.must_run.push(save_id.clone());
        saves.push(save_id);
    }

    (section, saves)
}

/// Shared tail of every job graph: collect `outputs` into a job-result
/// node inside `namespace`, pop the namespace, and surface the popped
/// result as the graph's root node.
pub(crate) fn result_sections(
    namespace: &NodeNamespace,
    parent_ns: &NodeNamespace,
    invocation: &str,
    outputs: &FxHashMap<String, NodeId>,
    barrier: &[NodeId],
) -> (GraphSection, NodeId) {
    let mut section = GraphSection::new();

    let jr_id = NodeId::new(
        "job_result",
        namespace.clone(),
        ResultType::map_of(ResultType::Any),
    );
    section.add_node(Node::new(
        jr_id.clone(),
        NodeDetails::JobResult {
            outputs: outputs.clone(),
        },
    ));

    let pop_id = NodeId::new(
        format!("{invocation}:pop"),
        parent_ns.clone(),
        ResultType::map_of(ResultType::Any),
    );
    let mut pop = Node::new(
        pop_id.clone(),
        NodeDetails::ContextPop {
            mapping: vec![(jr_id, "job_result".to_string())],
            closing: namespace.clone(),
        },
    );
    // Save nodes must complete before their namespace closes.
    for id in barrier {
        pop = pop.with_dependency(id.clone(), DependencyType::HARD);
    }
    section.add_node(pop);

    let result_id = NodeId::new("result", parent_ns.clone(), ResultType::map_of(ResultType::Any));
    section.add_node(Node::new(
        result_id.clone(),
        NodeDetails::KeyedItem {
            source: pop_id,
            key: "job_result".to_string(),
        },
    ));
    section.provide(result_id.clone());

    (section, result_id)
}
