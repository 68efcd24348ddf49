//! Job compilation: definitions plus resolved metadata in, a [`Graph`] out.
//!
//! `build_job` is pure and synchronous. It assembles small
//! [`GraphSection`](crate::graph::GraphSection)s bottom-up (arguments, the
//! model or flow body, saves, the job-result tail) and joins them while
//! checking that every section's declared inputs are already present.
//! Validation problems are accumulated across the whole build and reported
//! as one aggregate [`JobValidationError`]; nothing is dispatched before
//! the graph is fully validated.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tracing::instrument;

use crate::graph::{Graph, GraphSection, Node, NodeDetails, NodeId, NodeNamespace, ResultType};
use crate::meta::{
    JobConfig, JobDefinition, MetadataResolver, ModelDefinition, ObjectDefinition, ObjectSelector,
};

pub mod validation;

mod flow;
mod model;
mod sections;

pub use validation::{JobValidationError, ValidationIssue};

use flow::build_flow;
use model::{argument_sections, invoke_model, result_sections, save_sections};
use sections::{JoinMode, join_sections};
use validation::Problems;

/// Compile a job definition into an executable graph.
///
/// Fails with an aggregate validation error listing every problem found;
/// the graph of a failed build is never partially usable.
#[instrument(skip_all, fields(job = config.definition.kind()))]
pub fn build_job(
    config: &JobConfig,
    resolver: &dyn MetadataResolver,
) -> Result<Graph, JobValidationError> {
    let mut problems = Problems::new();
    let graph = build_definition(&config.definition, config, resolver, &mut problems);
    match graph {
        Some(graph) => problems.finish(graph),
        None => {
            // Resolution failed before a graph shape existed; the recorded
            // issues explain why.
            problems.finish(Graph::new(FxHashMap::default(), NodeId::rooted("result", ResultType::Any)))
        }
    }
}

impl JobDefinition {
    pub fn kind(&self) -> &'static str {
        match self {
            JobDefinition::RunModel { .. } => "run_model",
            JobDefinition::RunFlow { .. } => "run_flow",
            JobDefinition::ImportData { .. } => "import_data",
            JobDefinition::ExportData { .. } => "export_data",
            JobDefinition::JobGroup { .. } => "job_group",
        }
    }
}

fn build_definition(
    definition: &JobDefinition,
    config: &JobConfig,
    resolver: &dyn MetadataResolver,
    problems: &mut Problems,
) -> Option<Graph> {
    match definition {
        JobDefinition::RunModel {
            model,
            parameters,
            inputs,
            outputs,
        } => {
            let model = resolve_model(model, resolver, problems)?;
            let root_ns = NodeNamespace::root();
            let (args, param_ids, input_ids) = argument_sections(&root_ns, parameters, inputs);
            let sub = invoke_model(&root_ns, &model.key, &model, &param_ids, &input_ids, problems);
            let (saves, barrier) =
                save_sections(&sub.namespace, outputs, &sub.outputs, &model.key, problems);
            let (tail, root) =
                result_sections(&sub.namespace, &root_ns, &model.key, &sub.outputs, &barrier);
            let mut sections = vec![args, sub.section, saves, tail];
            sections.push(result_save_section(&root_ns, &root, config));
            let joined = join_sections(sections, JoinMode::Strict, problems);
            Some(Graph::new(joined.nodes, root))
        }
        JobDefinition::RunFlow {
            flow,
            models,
            parameters,
            inputs,
            outputs,
        } => {
            let flow_def = match resolver.get_job_metadata(flow) {
                Ok(ObjectDefinition::Flow(def)) => def,
                Ok(_) => {
                    problems.push(ValidationIssue::Metadata {
                        message: format!("selector {} did not resolve to a flow", flow.key),
                    });
                    return None;
                }
                Err(error) => {
                    problems.push(error.into());
                    return None;
                }
            };
            let mut model_map: FxHashMap<String, Arc<ModelDefinition>> = FxHashMap::default();
            for (node, selector) in models {
                if let Some(model) = resolve_model(selector, resolver, problems) {
                    model_map.insert(node.clone(), model);
                }
            }
            let root_ns = NodeNamespace::root();
            let (args, param_ids, input_ids) = argument_sections(&root_ns, parameters, inputs);
            let body = build_flow(
                &root_ns, &flow_def.key, &flow_def, &model_map, &param_ids, &input_ids, problems,
            );
            let (saves, barrier) =
                save_sections(&body.namespace, outputs, &body.outputs, &flow_def.key, problems);
            let (tail, root) =
                result_sections(&body.namespace, &root_ns, &flow_def.key, &body.outputs, &barrier);
            let mut sections = vec![args, body.section, saves, tail];
            sections.push(result_save_section(&root_ns, &root, config));
            let joined = join_sections(sections, JoinMode::Strict, problems);
            Some(Graph::new(joined.nodes, root))
        }
        JobDefinition::ImportData { source, target }
        | JobDefinition::ExportData { source, target } => {
            Some(data_transfer_graph(source, target))
        }
        JobDefinition::JobGroup {
            children,
            sequential,
        } => {
            let root_ns = NodeNamespace::root();
            let mut section = GraphSection::new();
            let mut outputs: FxHashMap<String, NodeId> = FxHashMap::default();
            let mut previous: Option<NodeId> = None;
            for (index, child) in children.iter().enumerate() {
                let Some(child_graph) = build_definition(child, config, resolver, problems) else {
                    continue;
                };
                let name = format!("child-{index}");
                let id = NodeId::rooted(&name, ResultType::Any);
                let after = match (&previous, sequential) {
                    (Some(prev), true) => vec![prev.clone()],
                    _ => Vec::new(),
                };
                section.add_node(Node::new(
                    id.clone(),
                    NodeDetails::ChildJob {
                        graph: Arc::new(child_graph),
                        after,
                    },
                ));
                outputs.insert(name, id.clone());
                previous = Some(id);
            }
            let root = NodeId::rooted("result", ResultType::map_of(ResultType::Any));
            section.add_node(Node::new(root.clone(), NodeDetails::JobResult { outputs }));
            let joined = join_sections(vec![section], JoinMode::Strict, problems);
            Some(Graph::new(joined.nodes, root))
        }
    }
}

fn resolve_model(
    selector: &ObjectSelector,
    resolver: &dyn MetadataResolver,
    problems: &mut Problems,
) -> Option<Arc<ModelDefinition>> {
    match resolver.get_job_metadata(selector) {
        Ok(ObjectDefinition::Model(model)) => Some(Arc::new(model)),
        Ok(_) => {
            problems.push(ValidationIssue::Metadata {
                message: format!("selector {} did not resolve to a model", selector.key),
            });
            None
        }
        Err(error) => {
            problems.push(error.into());
            None
        }
    }
}

/// `import_data` and `export_data` compile to the same spec, load, save
/// shape; direction lives entirely in the storage specs.
fn data_transfer_graph(source: &Value, target: &Value) -> Graph {
    let root_ns = NodeNamespace::root();
    let mut section = GraphSection::new();

    let source_spec = NodeId::rooted("source:spec", ResultType::Any);
    section.add_node(Node::new(
        source_spec.clone(),
        NodeDetails::DataSpec {
            spec: source.clone(),
        },
    ));
    let load = NodeId::rooted("source", ResultType::Any);
    section.add_node(Node::new(
        load.clone(),
        NodeDetails::LoadData {
            spec: source_spec,
        },
    ));
    let target_spec = NodeId::rooted("target:spec", ResultType::Any);
    section.add_node(Node::new(
        target_spec.clone(),
        NodeDetails::DataSpec {
            spec: target.clone(),
        },
    ));
    let root = NodeId::new("result", root_ns, ResultType::Any);
    section.add_node(Node::new(
        root.clone(),
        NodeDetails::SaveData {
            source: load,
            spec: target_spec,
        },
    ));
    section.must_run.push(root.clone());
    Graph::new(section.nodes, root)
}

/// Optional save of the finished job result, driven by the job config.
fn result_save_section(root_ns: &NodeNamespace, root: &NodeId, config: &JobConfig) -> GraphSection {
    let mut section = GraphSection::new();
    let Some(dir) = &config.result_dir else {
        return section;
    };
    let spec = json!({
        "dir": dir,
        "format": config.result_format.as_deref().unwrap_or("json"),
    });
    let spec_id = NodeId::new("result:spec", root_ns.clone(), ResultType::Any);
    section.add_node(Node::new(spec_id.clone(), NodeDetails::DataSpec { spec }));
    let save_id = NodeId::new("result:save", root_ns.clone(), ResultType::Any);
    section.add_node(Node::new(
        save_id.clone(),
        NodeDetails::SaveData {
            source: root.clone(),
            spec: spec_id,
        },
    ));
    section.must_run.push(save_id);
    section
}
