//! Model/flow definitions and collaborator fakes shared across tests.
#![allow(dead_code)]

use std::sync::Mutex;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use weft::engine::{DataHandler, ModelRunner};
use weft::errors::EngineError;
use weft::meta::{
    FlowDefinition, FlowEdge, FlowNode, FlowSocket, ModelDefinition, ObjectSelector, ParameterSpec,
    SocketSpec, StaticResolver,
};
use weft::graph::ResultType;

/// `sum = bias + left + right`, the workhorse of most scenarios.
pub fn adder_model() -> ModelDefinition {
    ModelDefinition::new("adder")
        .with_parameter("bias", ParameterSpec::required(ResultType::Integer))
        .with_input("left", SocketSpec::required(ResultType::Integer))
        .with_input("right", SocketSpec::required(ResultType::Integer))
        .with_output("sum", SocketSpec::required(ResultType::Integer))
}

/// Declares `rows` and discovers everything else at run time.
pub fn stats_model() -> ModelDefinition {
    let mut model = ModelDefinition::new("stats")
        .with_input("data", SocketSpec::required(ResultType::Any))
        .with_output("rows", SocketSpec::required(ResultType::Integer));
    model.dynamic_outputs = true;
    model
}

/// Always fails at run time; its signature is a single passthrough.
pub fn broken_model() -> ModelDefinition {
    ModelDefinition::new("broken")
        .with_input("data", SocketSpec::required(ResultType::Any))
        .with_output("out", SocketSpec::required(ResultType::Any))
}

/// Two adders chained through a mid wire: `second.left = first.sum`.
pub fn chained_flow() -> FlowDefinition {
    let mut nodes = FxHashMap::default();
    nodes.insert("bias".to_string(), FlowNode::Parameter);
    nodes.insert("a".to_string(), FlowNode::Input);
    nodes.insert("b".to_string(), FlowNode::Input);
    nodes.insert("c".to_string(), FlowNode::Input);
    nodes.insert("total".to_string(), FlowNode::Output);
    let adder_node = || FlowNode::Model {
        parameters: vec!["bias".to_string()],
        inputs: vec!["left".to_string(), "right".to_string()],
        outputs: vec!["sum".to_string()],
    };
    nodes.insert("first".to_string(), adder_node());
    nodes.insert("second".to_string(), adder_node());
    let edges = vec![
        wire(FlowSocket::node("bias"), FlowSocket::socket("first", "bias")),
        wire(FlowSocket::node("bias"), FlowSocket::socket("second", "bias")),
        wire(FlowSocket::node("a"), FlowSocket::socket("first", "left")),
        wire(FlowSocket::node("b"), FlowSocket::socket("first", "right")),
        wire(
            FlowSocket::socket("first", "sum"),
            FlowSocket::socket("second", "left"),
        ),
        wire(FlowSocket::node("c"), FlowSocket::socket("second", "right")),
        wire(FlowSocket::socket("second", "sum"), FlowSocket::node("total")),
    ];
    FlowDefinition {
        key: "chained".to_string(),
        nodes,
        edges,
    }
}

pub fn wire(source: FlowSocket, target: FlowSocket) -> FlowEdge {
    FlowEdge { source, target }
}

/// Metadata resolver holding every fixture definition.
pub fn fixture_metadata() -> StaticResolver {
    StaticResolver::new()
        .with_model(adder_model())
        .with_model(stats_model())
        .with_model(broken_model())
        .with_flow(chained_flow())
}

fn int(value: Option<&Value>) -> i64 {
    value.and_then(Value::as_i64).unwrap_or(0)
}

/// In-process model runner covering the fixture models.
pub struct FixtureRunner;

#[async_trait]
impl ModelRunner for FixtureRunner {
    async fn run_model(
        &self,
        model: &ModelDefinition,
        parameters: FxHashMap<String, Value>,
        inputs: FxHashMap<String, Value>,
    ) -> Result<FxHashMap<String, Value>, EngineError> {
        let mut outputs = FxHashMap::default();
        match model.key.as_str() {
            "adder" => {
                let sum = int(parameters.get("bias"))
                    + int(inputs.get("left"))
                    + int(inputs.get("right"));
                outputs.insert("sum".to_string(), json!(sum));
            }
            "stats" => {
                let rows = inputs
                    .get("data")
                    .and_then(Value::as_array)
                    .map(Vec::len)
                    .unwrap_or(0);
                outputs.insert("rows".to_string(), json!(rows));
                outputs.insert("max".to_string(), json!(99));
                outputs.insert("min".to_string(), json!(1));
            }
            "broken" => {
                return Err(EngineError::execution(&model.key, "model code exploded"));
            }
            other => {
                return Err(EngineError::execution(other, "fixture runner has no such model"));
            }
        }
        Ok(outputs)
    }

    async fn import_model(&self, selector: &ObjectSelector) -> Result<Value, EngineError> {
        Ok(json!({ "imported": selector.key }))
    }
}

/// A model runner whose dynamic model reports a key colliding with a
/// declared socket of the invocation namespace.
pub struct CollidingRunner;

#[async_trait]
impl ModelRunner for CollidingRunner {
    async fn run_model(
        &self,
        _model: &ModelDefinition,
        _parameters: FxHashMap<String, Value>,
        _inputs: FxHashMap<String, Value>,
    ) -> Result<FxHashMap<String, Value>, EngineError> {
        let mut outputs = FxHashMap::default();
        outputs.insert("rows".to_string(), json!(1));
        // "data" already names the input socket node in this namespace.
        outputs.insert("data".to_string(), json!("collides"));
        Ok(outputs)
    }

    async fn import_model(&self, selector: &ObjectSelector) -> Result<Value, EngineError> {
        Ok(json!({ "imported": selector.key }))
    }
}

/// In-memory data layer keyed by the `path` field of storage specs.
#[derive(Default)]
pub struct MemoryData {
    store: Mutex<FxHashMap<String, Value>>,
}

impl MemoryData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, path: &str, value: Value) -> Self {
        self.store.lock().unwrap().insert(path.to_string(), value);
        self
    }

    pub fn get(&self, path: &str) -> Option<Value> {
        self.store.lock().unwrap().get(path).cloned()
    }

    fn key(spec: &Value) -> Result<String, EngineError> {
        spec.get("path")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| EngineError::execution("data", format!("spec has no path: {spec}")))
    }
}

#[async_trait]
impl DataHandler for MemoryData {
    async fn load(&self, spec: &Value) -> Result<Value, EngineError> {
        let key = Self::key(spec)?;
        self.store
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or_else(|| EngineError::execution("data", format!("nothing stored at {key}")))
    }

    async fn save(&self, value: Value, spec: &Value) -> Result<Value, EngineError> {
        let key = Self::key(spec)?;
        self.store.lock().unwrap().insert(key.clone(), value);
        Ok(json!({ "path": key }))
    }
}
