//! Job, model and flow definitions, and the metadata-resolution boundary.
//!
//! These types describe *what a job asks for*. They are consumed only by
//! the graph builder; the running engine never touches metadata. Resolution
//! of selectors into definitions is a collaborator concern behind the
//! [`MetadataResolver`] trait.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::graph::ResultType;

/// Reference to a metadata object (model, flow, dataset) held by an
/// external repository.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectSelector {
    pub object_type: ObjectType,
    pub key: String,
    /// Pinned version, or `None` for latest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

impl ObjectSelector {
    #[must_use]
    pub fn model(key: impl Into<String>) -> Self {
        Self {
            object_type: ObjectType::Model,
            key: key.into(),
            version: None,
        }
    }

    #[must_use]
    pub fn flow(key: impl Into<String>) -> Self {
        Self {
            object_type: ObjectType::Flow,
            key: key.into(),
            version: None,
        }
    }

    #[must_use]
    pub fn data(key: impl Into<String>) -> Self {
        Self {
            object_type: ObjectType::Data,
            key: key.into(),
            version: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Model,
    Flow,
    Data,
}

/// Declared parameter of a model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub param_type: ResultType,
    #[serde(default)]
    pub optional: bool,
    /// Applied by the builder when an optional parameter is not supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParameterSpec {
    #[must_use]
    pub fn required(param_type: ResultType) -> Self {
        Self {
            param_type,
            optional: false,
            default: None,
        }
    }

    #[must_use]
    pub fn optional(param_type: ResultType, default: Option<Value>) -> Self {
        Self {
            param_type,
            optional: true,
            default,
        }
    }
}

/// Declared input or output socket of a model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SocketSpec {
    pub socket_type: ResultType,
    #[serde(default)]
    pub optional: bool,
}

impl SocketSpec {
    #[must_use]
    pub fn required(socket_type: ResultType) -> Self {
        Self {
            socket_type,
            optional: false,
        }
    }

    #[must_use]
    pub fn optional(socket_type: ResultType) -> Self {
        Self {
            socket_type,
            optional: true,
        }
    }
}

/// Resolved definition of a model: its full parameter/input/output
/// signature plus whatever the runner needs to locate the executable code.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub key: String,
    #[serde(default)]
    pub parameters: FxHashMap<String, ParameterSpec>,
    #[serde(default)]
    pub inputs: FxHashMap<String, SocketSpec>,
    #[serde(default)]
    pub outputs: FxHashMap<String, SocketSpec>,
    /// Models may declare outputs only discoverable at runtime.
    #[serde(default)]
    pub dynamic_outputs: bool,
}

impl ModelDefinition {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            parameters: FxHashMap::default(),
            inputs: FxHashMap::default(),
            outputs: FxHashMap::default(),
            dynamic_outputs: false,
        }
    }

    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, spec: ParameterSpec) -> Self {
        self.parameters.insert(name.into(), spec);
        self
    }

    #[must_use]
    pub fn with_input(mut self, name: impl Into<String>, spec: SocketSpec) -> Self {
        self.inputs.insert(name.into(), spec);
        self
    }

    #[must_use]
    pub fn with_output(mut self, name: impl Into<String>, spec: SocketSpec) -> Self {
        self.outputs.insert(name.into(), spec);
        self
    }
}

/// One node of a flow definition.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlowNode {
    /// Job-supplied parameter, broadcast to the model sockets it feeds.
    Parameter,
    /// Job-supplied input dataset.
    Input,
    /// Flow output, fed by exactly one model output socket.
    Output,
    /// Model invocation with declared socket names; the assigned model's
    /// signature must match.
    Model {
        parameters: Vec<String>,
        inputs: Vec<String>,
        outputs: Vec<String>,
    },
}

/// A socket address inside a flow: `node` plus an optional socket name
/// (parameter/input/output nodes are single-socket).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowSocket {
    pub node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket: Option<String>,
}

impl FlowSocket {
    #[must_use]
    pub fn node(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            socket: None,
        }
    }

    #[must_use]
    pub fn socket(node: impl Into<String>, socket: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            socket: Some(socket.into()),
        }
    }
}

/// A directed wire between two flow sockets.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlowEdge {
    pub source: FlowSocket,
    pub target: FlowSocket,
}

/// Resolved definition of a flow: named nodes plus socket wiring.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub key: String,
    pub nodes: FxHashMap<String, FlowNode>,
    pub edges: Vec<FlowEdge>,
}

/// What a submitted job asks the engine to do.
#[derive(Clone, Debug)]
pub enum JobDefinition {
    RunModel {
        model: ObjectSelector,
        parameters: FxHashMap<String, Value>,
        /// Input name to the storage spec the data layer loads from.
        inputs: FxHashMap<String, Value>,
        /// Output name to the storage spec results are saved to.
        outputs: FxHashMap<String, Value>,
    },
    RunFlow {
        flow: ObjectSelector,
        /// Flow model-node name to the model that fills the position.
        models: FxHashMap<String, ObjectSelector>,
        parameters: FxHashMap<String, Value>,
        inputs: FxHashMap<String, Value>,
        outputs: FxHashMap<String, Value>,
    },
    ImportData {
        source: Value,
        target: Value,
    },
    ExportData {
        source: Value,
        target: Value,
    },
    JobGroup {
        children: Vec<JobDefinition>,
        sequential: bool,
    },
}

/// Job-level configuration submitted alongside the definition.
#[derive(Clone, Debug)]
pub struct JobConfig {
    pub definition: JobDefinition,
    pub result_dir: Option<String>,
    pub result_format: Option<String>,
}

impl JobConfig {
    #[must_use]
    pub fn new(definition: JobDefinition) -> Self {
        Self {
            definition,
            result_dir: None,
            result_format: None,
        }
    }
}

/// A resolved metadata object.
#[derive(Clone, Debug)]
pub enum ObjectDefinition {
    Model(ModelDefinition),
    Flow(FlowDefinition),
    Data(Value),
}

/// Errors from the metadata collaborator.
#[derive(Debug, Error, Diagnostic)]
pub enum MetadataError {
    #[error("metadata object not found: {object_type:?} {key}")]
    #[diagnostic(code(weft::meta::not_found))]
    NotFound { object_type: ObjectType, key: String },

    #[error("metadata resolution failed for {key}: {message}")]
    #[diagnostic(code(weft::meta::resolution))]
    Resolution { key: String, message: String },
}

/// Collaborator that resolves object selectors into definitions.
///
/// Used only by the graph builder; deterministic for a given selector.
pub trait MetadataResolver: Send + Sync {
    fn get_job_metadata(&self, selector: &ObjectSelector)
    -> Result<ObjectDefinition, MetadataError>;
}

/// Fixed in-memory resolver, useful for tests and embedded deployments.
#[derive(Default)]
pub struct StaticResolver {
    objects: FxHashMap<ObjectSelector, ObjectDefinition>,
}

impl StaticResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, selector: ObjectSelector, definition: ObjectDefinition) {
        self.objects.insert(selector, definition);
    }

    #[must_use]
    pub fn with_model(mut self, definition: ModelDefinition) -> Self {
        let selector = ObjectSelector::model(definition.key.clone());
        self.objects.insert(selector, ObjectDefinition::Model(definition));
        self
    }

    #[must_use]
    pub fn with_flow(mut self, definition: FlowDefinition) -> Self {
        let selector = ObjectSelector::flow(definition.key.clone());
        self.objects.insert(selector, ObjectDefinition::Flow(definition));
        self
    }
}

impl MetadataResolver for StaticResolver {
    fn get_job_metadata(
        &self,
        selector: &ObjectSelector,
    ) -> Result<ObjectDefinition, MetadataError> {
        // Exact match first, then a version-agnostic lookup.
        if let Some(found) = self.objects.get(selector) {
            return Ok(found.clone());
        }
        let unversioned = ObjectSelector {
            object_type: selector.object_type,
            key: selector.key.clone(),
            version: None,
        };
        self.objects
            .get(&unversioned)
            .cloned()
            .ok_or_else(|| MetadataError::NotFound {
                object_type: selector.object_type,
                key: selector.key.clone(),
            })
    }
}
