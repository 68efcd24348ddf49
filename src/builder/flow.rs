//! Flow compilation: socket wiring checks plus Kahn's algorithm.
//!
//! A flow is wired socket-to-socket; compilation seeds the reachable set
//! with parameter and input nodes, then repeatedly builds a reachable node
//! and decrements the unmet-edge count of every node it feeds. Each model
//! position becomes its own push, body, pop sub-invocation so the same
//! model can appear at several positions without name collision. Nodes
//! never reached are reported as validation errors, not silently dropped.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::graph::{GraphSection, Node, NodeDetails, NodeId, NodeNamespace, ResultType};
use crate::meta::{FlowDefinition, FlowNode, FlowSocket, ModelDefinition};

use super::model::{invoke_model, pop_outputs};
use super::sections::{JoinMode, join_sections};
use super::validation::{Problems, ValidationIssue};

/// The open (not yet popped) subgraph of one flow invocation.
pub(crate) struct FlowBody {
    pub section: GraphSection,
    pub namespace: NodeNamespace,
    /// Inner ids of the flow's output nodes.
    pub outputs: FxHashMap<String, NodeId>,
}

type SocketKey = (String, Option<String>);

pub(crate) fn build_flow(
    parent_ns: &NodeNamespace,
    invocation: &str,
    flow: &FlowDefinition,
    models: &FxHashMap<String, Arc<ModelDefinition>>,
    parameter_sources: &FxHashMap<String, NodeId>,
    input_sources: &FxHashMap<String, NodeId>,
    problems: &mut Problems,
) -> FlowBody {
    let namespace = parent_ns.push(invocation);
    let wiring = check_wiring(flow, models, problems);

    // The flow's own context push maps the job-supplied values in.
    let push_id = NodeId::new(
        format!("{invocation}:push"),
        parent_ns.clone(),
        ResultType::map_of(ResultType::Any),
    );
    let mut push_section = GraphSection::new();
    let mut mapping: Vec<(NodeId, String)> = Vec::new();
    for (name, kind) in &flow.nodes {
        let sources = match kind {
            FlowNode::Parameter => parameter_sources,
            FlowNode::Input => input_sources,
            _ => continue,
        };
        match sources.get(name) {
            Some(outer) => {
                push_section.require(outer.clone());
                mapping.push((outer.clone(), name.clone()));
            }
            None => match kind {
                FlowNode::Parameter => problems.push(ValidationIssue::MissingParameter {
                    model: flow.key.clone(),
                    name: name.clone(),
                }),
                _ => problems.push(ValidationIssue::MissingInput {
                    model: flow.key.clone(),
                    name: name.clone(),
                }),
            },
        }
    }
    mapping.sort_by(|a, b| a.1.cmp(&b.1));
    push_section.add_node(Node::new(
        push_id.clone(),
        NodeDetails::ContextPush { mapping },
    ));

    let mut sections = vec![push_section];

    // Kahn's algorithm over flow nodes: a node is buildable once every
    // node feeding it has been built.
    let mut unmet: FxHashMap<String, usize> = FxHashMap::default();
    let mut feeds: FxHashMap<String, Vec<String>> = FxHashMap::default();
    for name in flow.nodes.keys() {
        unmet.insert(name.clone(), 0);
    }
    for edge in wiring.valid_edges(flow) {
        *unmet
            .entry(edge.target.node.clone())
            .or_default() += 1;
        feeds
            .entry(edge.source.node.clone())
            .or_default()
            .push(edge.target.node.clone());
    }

    let mut ready: Vec<String> = unmet
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(name, _)| name.clone())
        .collect();
    ready.sort();

    // Outer id supplying each (node, socket) pair, filled as nodes build.
    let mut supplied: FxHashMap<SocketKey, NodeId> = FxHashMap::default();
    let mut built: rustc_hash::FxHashSet<String> = rustc_hash::FxHashSet::default();
    let mut outputs: FxHashMap<String, NodeId> = FxHashMap::default();

    while let Some(name) = ready.pop() {
        built.insert(name.clone());
        let Some(kind) = flow.nodes.get(&name) else {
            continue;
        };
        match kind {
            FlowNode::Parameter => {
                let param_type = wiring.inferred.get(&name).cloned().unwrap_or(ResultType::Any);
                sections.push(value_node(
                    &namespace,
                    &push_id,
                    &name,
                    param_type,
                    parameter_sources.contains_key(&name),
                    &mut supplied,
                ));
            }
            FlowNode::Input => {
                sections.push(value_node(
                    &namespace,
                    &push_id,
                    &name,
                    ResultType::Any,
                    input_sources.contains_key(&name),
                    &mut supplied,
                ));
            }
            FlowNode::Model {
                parameters, inputs, ..
            } => {
                if let Some(model) = models.get(&name) {
                    let mut param_srcs = FxHashMap::default();
                    let mut input_srcs = FxHashMap::default();
                    let mut complete = true;
                    for socket in parameters {
                        match wiring.resolve(&name, socket, &supplied) {
                            Some(id) => {
                                param_srcs.insert(socket.clone(), id);
                            }
                            None => complete = false,
                        }
                    }
                    for socket in inputs {
                        match wiring.resolve(&name, socket, &supplied) {
                            Some(id) => {
                                input_srcs.insert(socket.clone(), id);
                            }
                            None => complete = false,
                        }
                    }
                    // Incomplete wiring was already recorded; building the
                    // node anyway would only produce follow-on noise.
                    if complete {
                        let sub = invoke_model(
                            &namespace,
                            &name,
                            model,
                            &param_srcs,
                            &input_srcs,
                            problems,
                        );
                        let (pop_section, outer) = pop_outputs(&namespace, &name, &sub);
                        sections.push(sub.section);
                        sections.push(pop_section);
                        for (socket, id) in outer {
                            supplied.insert((name.clone(), Some(socket)), id);
                        }
                    }
                }
            }
            FlowNode::Output => {
                if let Some(edge) = wiring.single_source(&name) {
                    let key = (edge.node.clone(), edge.socket.clone());
                    if let Some(source) = supplied.get(&key) {
                        let id = NodeId::new(
                            name.clone(),
                            namespace.clone(),
                            source.result_type().clone(),
                        );
                        let mut section = GraphSection::new();
                        section.require(source.clone());
                        section.add_node(Node::new(
                            id.clone(),
                            NodeDetails::Identity {
                                source: source.clone(),
                            },
                        ));
                        section.provide(id.clone());
                        sections.push(section);
                        outputs.insert(name.clone(), id);
                    }
                }
            }
        }
        if let Some(targets) = feeds.get(&name) {
            let mut newly: Vec<String> = Vec::new();
            for target in targets {
                if let Some(count) = unmet.get_mut(target) {
                    *count -= 1;
                    if *count == 0 {
                        newly.push(target.clone());
                    }
                }
            }
            newly.sort();
            ready.extend(newly);
        }
    }

    let mut unreached: Vec<String> = flow
        .nodes
        .keys()
        .filter(|name| !built.contains(*name))
        .cloned()
        .collect();
    if !unreached.is_empty() {
        unreached.sort();
        problems.push(ValidationIssue::UnreachableNodes {
            flow: flow.key.clone(),
            nodes: unreached,
        });
    }

    let section = join_sections(sections, JoinMode::Partial, problems);
    FlowBody {
        section,
        namespace,
        outputs,
    }
}

/// Parameter or input node inside the flow namespace: an item of the flow's
/// push when supplied by the job, a null placeholder otherwise (the missing
/// value was already reported).
fn value_node(
    namespace: &NodeNamespace,
    push_id: &NodeId,
    name: &str,
    value_type: ResultType,
    is_supplied: bool,
    supplied: &mut FxHashMap<SocketKey, NodeId>,
) -> GraphSection {
    let mut section = GraphSection::new();
    let id = NodeId::new(name.to_string(), namespace.clone(), value_type);
    let details = if is_supplied {
        NodeDetails::BundleItem {
            source: push_id.clone(),
            key: name.to_string(),
        }
    } else {
        NodeDetails::StaticValue { value: Value::Null }
    };
    section.add_node(Node::new(id.clone(), details));
    section.provide(id.clone());
    supplied.insert((name.to_string(), None), id);
    section
}

/// Result of the socket wiring pre-pass.
struct Wiring {
    /// Single validated source per target socket.
    sources: FxHashMap<SocketKey, FlowSocket>,
    /// Inferred types for parameter nodes.
    inferred: FxHashMap<String, ResultType>,
    /// Edges whose endpoints both exist, used for reachability counting.
    edge_ok: Vec<usize>,
}

impl Wiring {
    fn valid_edges<'a>(&'a self, flow: &'a FlowDefinition) -> impl Iterator<Item = &'a crate::meta::FlowEdge> {
        self.edge_ok.iter().map(|index| &flow.edges[*index])
    }

    fn resolve(
        &self,
        node: &str,
        socket: &str,
        supplied: &FxHashMap<SocketKey, NodeId>,
    ) -> Option<NodeId> {
        let source = self
            .sources
            .get(&(node.to_string(), Some(socket.to_string())))?;
        supplied
            .get(&(source.node.clone(), source.socket.clone()))
            .cloned()
    }

    fn single_source(&self, output: &str) -> Option<&FlowSocket> {
        self.sources.get(&(output.to_string(), None))
    }
}

/// Validate model assignments, signatures and socket wiring, accumulating
/// every problem found.
fn check_wiring(
    flow: &FlowDefinition,
    models: &FxHashMap<String, Arc<ModelDefinition>>,
    problems: &mut Problems,
) -> Wiring {
    let mut incoming: FxHashMap<SocketKey, Vec<FlowSocket>> = FxHashMap::default();
    let mut edge_ok = Vec::new();

    for (index, edge) in flow.edges.iter().enumerate() {
        let mut endpoints_ok = true;
        for endpoint in [&edge.source, &edge.target] {
            if !flow.nodes.contains_key(&endpoint.node) {
                problems.push(ValidationIssue::UnknownFlowNode {
                    flow: flow.key.clone(),
                    node: endpoint.node.clone(),
                });
                endpoints_ok = false;
            }
        }
        if !endpoints_ok {
            continue;
        }
        edge_ok.push(index);
        incoming
            .entry((edge.target.node.clone(), edge.target.socket.clone()))
            .or_default()
            .push(edge.source.clone());
    }

    // Model assignment and signature checks.
    for (name, kind) in &flow.nodes {
        let FlowNode::Model {
            parameters,
            inputs,
            outputs,
        } = kind
        else {
            continue;
        };
        let Some(model) = models.get(name) else {
            problems.push(ValidationIssue::UnassignedModel {
                flow: flow.key.clone(),
                node: name.clone(),
            });
            continue;
        };
        for (declared, actual, label) in [
            (parameters, &model.parameters.keys().cloned().collect::<Vec<_>>(), "parameters"),
            (inputs, &model.inputs.keys().cloned().collect::<Vec<_>>(), "inputs"),
            (outputs, &model.outputs.keys().cloned().collect::<Vec<_>>(), "outputs"),
        ] {
            let mut declared: Vec<String> = declared.clone();
            let mut actual: Vec<String> = actual.clone();
            declared.sort();
            actual.sort();
            if declared != actual {
                problems.push(ValidationIssue::SignatureMismatch {
                    flow: flow.key.clone(),
                    node: name.clone(),
                    detail: format!(
                        "{label} declared as {declared:?} but model {} has {actual:?}",
                        model.key
                    ),
                });
            }
        }
    }

    // Exactly one source per consuming socket.
    let mut sources: FxHashMap<SocketKey, FlowSocket> = FxHashMap::default();
    let mut require_single = |key: SocketKey, problems: &mut Problems| {
        let target = match &key.1 {
            Some(socket) => format!("{}.{}", key.0, socket),
            None => key.0.clone(),
        };
        match incoming.get(&key).map(Vec::as_slice) {
            Some([single]) => {
                sources.insert(key, single.clone());
            }
            Some(many) => problems.push(ValidationIssue::DuplicateSource {
                flow: flow.key.clone(),
                target,
                count: many.len(),
            }),
            None => problems.push(ValidationIssue::MissingSource {
                flow: flow.key.clone(),
                target,
            }),
        }
    };
    for (name, kind) in &flow.nodes {
        match kind {
            FlowNode::Model {
                parameters, inputs, ..
            } => {
                for socket in parameters.iter().chain(inputs) {
                    require_single((name.clone(), Some(socket.clone())), problems);
                }
            }
            FlowNode::Output => require_single((name.clone(), None), problems),
            FlowNode::Parameter | FlowNode::Input => {}
        }
    }

    // Infer parameter node types from the sockets they feed.
    let mut inferred: FxHashMap<String, ResultType> = FxHashMap::default();
    for (name, kind) in &flow.nodes {
        if !matches!(kind, FlowNode::Parameter) {
            continue;
        }
        let mut fed_types: Vec<ResultType> = Vec::new();
        for index in &edge_ok {
            let edge = &flow.edges[*index];
            if edge.source.node != *name {
                continue;
            }
            let Some(socket) = &edge.target.socket else {
                continue;
            };
            if let Some(model) = models.get(&edge.target.node) {
                let spec_type = model
                    .parameters
                    .get(socket)
                    .map(|spec| spec.param_type.clone())
                    .or_else(|| model.inputs.get(socket).map(|spec| spec.socket_type.clone()));
                if let Some(spec_type) = spec_type {
                    fed_types.push(spec_type);
                }
            }
        }
        fed_types.retain(|t| *t != ResultType::Any);
        fed_types.dedup();
        match fed_types.as_slice() {
            [] => {
                if !flow.edges.iter().any(|edge| edge.source.node == *name) {
                    problems.push(ValidationIssue::UntypedSocket {
                        flow: flow.key.clone(),
                        node: name.clone(),
                        detail: "not connected to any model".to_string(),
                    });
                }
                inferred.insert(name.clone(), ResultType::Any);
            }
            [one] => {
                inferred.insert(name.clone(), one.clone());
            }
            many => {
                let mut distinct = many.to_vec();
                distinct.sort_by_key(ToString::to_string);
                distinct.dedup();
                if distinct.len() > 1 {
                    problems.push(ValidationIssue::UntypedSocket {
                        flow: flow.key.clone(),
                        node: name.clone(),
                        detail: format!(
                            "fed sockets disagree on its type: {}",
                            distinct
                                .iter()
                                .map(ToString::to_string)
                                .collect::<Vec<_>>()
                                .join(" vs ")
                        ),
                    });
                }
                inferred.insert(name.clone(), distinct[0].clone());
            }
        }
    }

    Wiring {
        sources,
        inferred,
        edge_ok,
    }
}
