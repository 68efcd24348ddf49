//! Node executable functions and the resolver boundary.
//!
//! Every dispatched node runs exactly one [`NodeFunction`]. The
//! [`StandardResolver`] covers the structural variants (values, mappings,
//! context push and pop, result collection) itself and delegates model and
//! data work to the pluggable [`ModelRunner`] and [`DataHandler`]
//! collaborators.

use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::errors::EngineError;
use crate::graph::{DependencyType, Node, NodeDetails, NodeId, ResultType};
use crate::meta::{ModelDefinition, ObjectSelector};

use super::context::EngineContext;

/// Read-only view handed to a running node function.
///
/// `pinned` is the snapshot taken at dispatch and never changes. Deferred
/// dependencies may complete after dispatch, so a failed pinned lookup
/// falls through to the latest published snapshot.
#[derive(Clone)]
pub struct ExecContext {
    pinned: Arc<EngineContext>,
    latest: watch::Receiver<Arc<EngineContext>>,
}

impl ExecContext {
    #[must_use]
    pub fn new(pinned: Arc<EngineContext>, latest: watch::Receiver<Arc<EngineContext>>) -> Self {
        Self { pinned, latest }
    }

    /// Resolve a completed result by id.
    pub fn lookup(&self, id: &NodeId) -> Result<Value, EngineError> {
        match self.pinned.lookup(id) {
            Ok(value) => Ok(value),
            Err(pinned_error) => {
                let latest = self.latest.borrow();
                latest.lookup(id).or(Err(pinned_error))
            }
        }
    }

    /// All results succeeded as of the pinned snapshot.
    #[must_use]
    pub fn iter_items(&self) -> Vec<(NodeId, Value)> {
        self.pinned
            .iter_succeeded()
            .map(|(id, value)| (id.clone(), value.clone()))
            .collect()
    }

    /// Current dependency set of a node, as of the pinned snapshot.
    #[must_use]
    pub fn dependencies(&self, id: &NodeId) -> FxHashMap<NodeId, DependencyType> {
        self.pinned
            .dependencies(id)
            .map(|deps| FxHashMap::clone(deps))
            .unwrap_or_default()
    }
}

/// A dependency edge proposed by a dynamic graph update.
#[derive(Clone, Debug)]
pub struct UpdateEdge {
    pub dependent: NodeId,
    pub dependency: NodeId,
    pub dep_type: DependencyType,
}

/// New nodes and edges a running function asks to add to the live graph.
#[derive(Clone, Debug, Default)]
pub struct GraphUpdate {
    pub nodes: Vec<Node>,
    pub edges: Vec<UpdateEdge>,
}

impl GraphUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// Result of one function run: the node's value plus an optional graph
/// update request that the graph processor validates before applying.
pub struct FunctionOutcome {
    pub value: Value,
    pub update: Option<GraphUpdate>,
}

impl From<Value> for FunctionOutcome {
    fn from(value: Value) -> Self {
        Self {
            value,
            update: None,
        }
    }
}

/// One node's executable logic.
#[async_trait]
pub trait NodeFunction: Send + Sync {
    async fn run(&self, ctx: &ExecContext) -> Result<FunctionOutcome, EngineError>;
}

/// Resolves a node into its executable. Deterministic for a given node.
pub trait FunctionResolver: Send + Sync {
    fn resolve(&self, node: &Node) -> Result<Arc<dyn NodeFunction>, EngineError>;
}

/// Collaborator executing model code.
#[async_trait]
pub trait ModelRunner: Send + Sync {
    /// Run a model with gathered parameter and input values; returns one
    /// value per output name.
    async fn run_model(
        &self,
        model: &ModelDefinition,
        parameters: FxHashMap<String, Value>,
        inputs: FxHashMap<String, Value>,
    ) -> Result<FxHashMap<String, Value>, EngineError>;

    /// Check out a model package, returning whatever handle the runner
    /// needs later.
    async fn import_model(&self, selector: &ObjectSelector) -> Result<Value, EngineError>;
}

/// Collaborator behind the load and save node variants.
#[async_trait]
pub trait DataHandler: Send + Sync {
    async fn load(&self, spec: &Value) -> Result<Value, EngineError>;
    async fn save(&self, value: Value, spec: &Value) -> Result<Value, EngineError>;
}

/// The built-in resolver: structural variants are executed in-process,
/// model and data variants delegate to the installed collaborators.
#[derive(Default)]
pub struct StandardResolver {
    model_runner: Option<Arc<dyn ModelRunner>>,
    data_handler: Option<Arc<dyn DataHandler>>,
}

impl StandardResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_model_runner(mut self, runner: Arc<dyn ModelRunner>) -> Self {
        self.model_runner = Some(runner);
        self
    }

    #[must_use]
    pub fn with_data_handler(mut self, handler: Arc<dyn DataHandler>) -> Self {
        self.data_handler = Some(handler);
        self
    }

    fn model_runner(&self, id: &NodeId) -> Result<Arc<dyn ModelRunner>, EngineError> {
        self.model_runner
            .clone()
            .ok_or_else(|| EngineError::MissingCollaborator {
                id: id.to_string(),
                collaborator: "model runner",
            })
    }

    fn data_handler(&self, id: &NodeId) -> Result<Arc<dyn DataHandler>, EngineError> {
        self.data_handler
            .clone()
            .ok_or_else(|| EngineError::MissingCollaborator {
                id: id.to_string(),
                collaborator: "data handler",
            })
    }
}

impl FunctionResolver for StandardResolver {
    fn resolve(&self, node: &Node) -> Result<Arc<dyn NodeFunction>, EngineError> {
        let id = node.id().clone();
        Ok(match node.details() {
            NodeDetails::StaticValue { value } => Arc::new(StaticFn {
                value: value.clone(),
            }),
            NodeDetails::Identity { source } | NodeDetails::DataView { source } => {
                Arc::new(IdentityFn {
                    source: source.clone(),
                })
            }
            NodeDetails::KeyedItem { source, key }
            | NodeDetails::BundleItem { source, key }
            | NodeDetails::DataItem { source, key } => Arc::new(KeyedFn {
                id,
                source: source.clone(),
                key: key.clone(),
            }),
            NodeDetails::ContextPush { mapping } => Arc::new(RemapFn {
                mapping: mapping.clone(),
            }),
            NodeDetails::ContextPop { mapping, .. } => Arc::new(RemapFn {
                mapping: mapping.clone(),
            }),
            NodeDetails::JobResult { outputs } => Arc::new(CollectFn {
                outputs: outputs.clone(),
            }),
            NodeDetails::DataSpec { spec } => Arc::new(StaticFn { value: spec.clone() }),
            NodeDetails::LoadData { spec } => Arc::new(LoadFn {
                handler: self.data_handler(&id)?,
                spec: spec.clone(),
            }),
            NodeDetails::SaveData { source, spec } => Arc::new(SaveFn {
                handler: self.data_handler(&id)?,
                source: source.clone(),
                spec: spec.clone(),
            }),
            NodeDetails::ImportModel { selector } => Arc::new(ImportFn {
                runner: self.model_runner(&id)?,
                selector: selector.clone(),
            }),
            NodeDetails::RunModel {
                model,
                push: _,
                sockets,
            } => Arc::new(RunModelFn {
                runner: self.model_runner(&id)?,
                id,
                model: Arc::clone(model),
                sockets: sockets.clone(),
            }),
            NodeDetails::DynamicOutputs { model } => Arc::new(DynamicOutputsFn {
                id,
                model: model.clone(),
            }),
            NodeDetails::ChildJob { .. } => {
                // Child jobs are dispatched by the graph processor itself,
                // not through a function.
                return Err(EngineError::UnresolvedFunction {
                    id: id.to_string(),
                    detail: "child-job nodes have no executable function".to_string(),
                });
            }
        })
    }
}

struct StaticFn {
    value: Value,
}

#[async_trait]
impl NodeFunction for StaticFn {
    async fn run(&self, _ctx: &ExecContext) -> Result<FunctionOutcome, EngineError> {
        Ok(self.value.clone().into())
    }
}

struct IdentityFn {
    source: NodeId,
}

#[async_trait]
impl NodeFunction for IdentityFn {
    async fn run(&self, ctx: &ExecContext) -> Result<FunctionOutcome, EngineError> {
        Ok(ctx.lookup(&self.source)?.into())
    }
}

struct KeyedFn {
    id: NodeId,
    source: NodeId,
    key: String,
}

#[async_trait]
impl NodeFunction for KeyedFn {
    async fn run(&self, ctx: &ExecContext) -> Result<FunctionOutcome, EngineError> {
        let value = ctx.lookup(&self.source)?;
        let item = value
            .get(&self.key)
            .cloned()
            .ok_or_else(|| EngineError::execution(
                &self.id,
                format!("result of {} has no key '{}'", self.source, self.key),
            ))?;
        Ok(item.into())
    }
}

/// Shared by context push and pop: gather sources into a keyed collection
/// under their mapped names.
struct RemapFn {
    mapping: Vec<(NodeId, String)>,
}

#[async_trait]
impl NodeFunction for RemapFn {
    async fn run(&self, ctx: &ExecContext) -> Result<FunctionOutcome, EngineError> {
        let mut out = Map::new();
        for (source, name) in &self.mapping {
            out.insert(name.clone(), ctx.lookup(source)?);
        }
        Ok(Value::Object(out).into())
    }
}

struct CollectFn {
    outputs: FxHashMap<String, NodeId>,
}

#[async_trait]
impl NodeFunction for CollectFn {
    async fn run(&self, ctx: &ExecContext) -> Result<FunctionOutcome, EngineError> {
        let mut out = Map::new();
        for (name, id) in &self.outputs {
            out.insert(name.clone(), ctx.lookup(id)?);
        }
        Ok(Value::Object(out).into())
    }
}

struct LoadFn {
    handler: Arc<dyn DataHandler>,
    spec: NodeId,
}

#[async_trait]
impl NodeFunction for LoadFn {
    async fn run(&self, ctx: &ExecContext) -> Result<FunctionOutcome, EngineError> {
        let spec = ctx.lookup(&self.spec)?;
        Ok(self.handler.load(&spec).await?.into())
    }
}

struct SaveFn {
    handler: Arc<dyn DataHandler>,
    source: NodeId,
    spec: NodeId,
}

#[async_trait]
impl NodeFunction for SaveFn {
    async fn run(&self, ctx: &ExecContext) -> Result<FunctionOutcome, EngineError> {
        let value = ctx.lookup(&self.source)?;
        let spec = ctx.lookup(&self.spec)?;
        Ok(self.handler.save(value, &spec).await?.into())
    }
}

struct ImportFn {
    runner: Arc<dyn ModelRunner>,
    selector: ObjectSelector,
}

#[async_trait]
impl NodeFunction for ImportFn {
    async fn run(&self, _ctx: &ExecContext) -> Result<FunctionOutcome, EngineError> {
        Ok(self.runner.import_model(&self.selector).await?.into())
    }
}

struct RunModelFn {
    runner: Arc<dyn ModelRunner>,
    id: NodeId,
    model: Arc<ModelDefinition>,
    sockets: FxHashMap<String, NodeId>,
}

#[async_trait]
impl NodeFunction for RunModelFn {
    async fn run(&self, ctx: &ExecContext) -> Result<FunctionOutcome, EngineError> {
        let mut parameters = FxHashMap::default();
        let mut inputs = FxHashMap::default();
        for (name, source) in &self.sockets {
            let value = ctx.lookup(source)?;
            if self.model.parameters.contains_key(name) {
                parameters.insert(name.clone(), value);
            } else {
                inputs.insert(name.clone(), value);
            }
        }

        let outputs = self
            .runner
            .run_model(&self.model, parameters, inputs)
            .await?;

        for name in self.model.outputs.keys() {
            if !outputs.contains_key(name) {
                return Err(EngineError::execution(
                    &self.id,
                    format!("model {} produced no output '{name}'", self.model.key),
                ));
            }
        }

        // Undeclared outputs of a dynamic-output model become new bundle
        // items feeding the invocation's dynamic-outputs node.
        let update = if self.model.dynamic_outputs {
            let namespace = self.id.namespace().clone();
            let dynamic = NodeId::new(
                "dynamic",
                namespace.clone(),
                ResultType::map_of(ResultType::Any),
            );
            let mut update = GraphUpdate::default();
            let mut extra: Vec<&String> = outputs
                .keys()
                .filter(|name| !self.model.outputs.contains_key(*name))
                .collect();
            extra.sort();
            for name in extra {
                let item = NodeId::new(name.clone(), namespace.clone(), ResultType::Any);
                update.nodes.push(Node::new(
                    item.clone(),
                    NodeDetails::BundleItem {
                        source: self.id.clone(),
                        key: name.clone(),
                    },
                ));
                update.edges.push(UpdateEdge {
                    dependent: dynamic.clone(),
                    dependency: item,
                    dep_type: DependencyType::HARD,
                });
            }
            (!update.is_empty()).then_some(update)
        } else {
            None
        };

        let value = Value::Object(
            outputs
                .into_iter()
                .collect::<Map<String, Value>>(),
        );
        Ok(FunctionOutcome { value, update })
    }
}

struct DynamicOutputsFn {
    id: NodeId,
    model: NodeId,
}

#[async_trait]
impl NodeFunction for DynamicOutputsFn {
    async fn run(&self, ctx: &ExecContext) -> Result<FunctionOutcome, EngineError> {
        let mut out = Map::new();
        let mut deps: Vec<NodeId> = ctx
            .dependencies(&self.id)
            .into_keys()
            .filter(|dep| *dep != self.model)
            .collect();
        deps.sort_by_key(ToString::to_string);
        for dep in deps {
            out.insert(dep.name().to_string(), ctx.lookup(&dep)?);
        }
        Ok(Value::Object(out).into())
    }
}
