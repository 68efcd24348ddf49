//! The engine actor: job intake, the job registry, and per-job supervision.
//!
//! Every submitted job gets a job processor child that builds the graph
//! and runs it through a [`GraphProcessor`](super::processor::GraphProcessor).
//! Child jobs spawned by running graphs come back through the same intake,
//! so composed jobs appear in the registry like any other job.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::actors::{
    Actor, ActorContext, ActorError, ActorInterface, ActorPath, ArgKind, HandlerSpec, Message,
    MessageArg, ParamSpec, DEFAULT_POOL,
};
use crate::builder::{JobValidationError, build_job};
use crate::errors::EngineError;
use crate::graph::{Graph, NodeId};
use crate::meta::{JobConfig, MetadataResolver};

use super::config::EngineConfig;
use super::functions::FunctionResolver;
use super::processor::{
    CHILD_JOB_FAILED, CHILD_JOB_SUCCEEDED, ChildJobFailure, ChildJobOutcome, GraphProcessor,
};

pub const SUBMIT_JOB: &str = "submit_job";
pub const GET_JOB_LIST: &str = "get_job_list";
pub const GET_JOB_DETAILS: &str = "get_job_details";
pub const JOB_SUBMITTED: &str = "job_submitted";
pub const JOB_LIST: &str = "job_list";
pub const JOB_DETAILS: &str = "job_details";
pub const JOB_SUCCEEDED: &str = "job_succeeded";
pub const JOB_FAILED: &str = "job_failed";
pub(crate) const SUBMIT_CHILD_JOB: &str = "submit_child_job";

/// Anything that can end a job short of success.
#[derive(Clone, Debug, Error, Diagnostic)]
pub enum JobError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Validation(#[from] JobValidationError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),
    #[error("job runtime failure: {0}")]
    #[diagnostic(code(weft::engine::runtime))]
    Runtime(String),
}

impl From<ActorError> for JobError {
    fn from(error: ActorError) -> Self {
        JobError::Runtime(error.to_string())
    }
}

/// Payload of [`SUBMIT_JOB`].
#[derive(Clone, Debug)]
pub struct JobRequest {
    pub config: JobConfig,
    /// Actor to notify with [`JOB_SUCCEEDED`] or [`JOB_FAILED`] when the
    /// job finishes.
    pub callback: Option<ActorPath>,
}

/// Payload of [`SUBMIT_CHILD_JOB`], sent by a graph processor that hit a
/// child-job node.
#[derive(Clone, Debug)]
pub(crate) struct ChildJobRequest {
    pub parent_key: String,
    pub node: NodeId,
    pub graph: Arc<Graph>,
    /// The graph processor waiting on this child's completion.
    pub monitor: ActorPath,
}

#[derive(Clone, Debug)]
pub struct JobOutcome {
    pub key: String,
    pub result: Value,
}

#[derive(Clone, Debug)]
pub struct JobFailure {
    pub key: String,
    pub error: JobError,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum JobStatus {
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    fn as_str(self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }
}

struct JobRecord {
    key: String,
    kind: &'static str,
    actor: String,
    submitted: DateTime<Utc>,
    finished: Option<DateTime<Utc>>,
    status: JobStatus,
    result: Option<Value>,
    error: Option<JobError>,
    callback: Option<ActorPath>,
    /// Set for child jobs: the requesting node and the graph processor to
    /// notify.
    child: Option<(NodeId, ActorPath)>,
}

impl JobRecord {
    fn summary(&self) -> Value {
        json!({
            "key": self.key,
            "kind": self.kind,
            "status": self.status.as_str(),
            "submitted": self.submitted.to_rfc3339(),
            "finished": self.finished.map(|t| t.to_rfc3339()),
        })
    }

    fn details(&self) -> Value {
        let mut details = self.summary();
        if let Value::Object(map) = &mut details {
            map.insert("result".into(), self.result.clone().unwrap_or(Value::Null));
            map.insert(
                "error".into(),
                self.error
                    .as_ref()
                    .map(|e| Value::String(e.to_string()))
                    .unwrap_or(Value::Null),
            );
        }
        details
    }
}

/// The job intake and registry actor.
pub struct Engine {
    metadata: Arc<dyn MetadataResolver>,
    resolver: Arc<dyn FunctionResolver>,
    config: Arc<EngineConfig>,
    jobs: FxHashMap<String, JobRecord>,
    seq: u64,
}

impl Engine {
    #[must_use]
    pub fn new(
        metadata: Arc<dyn MetadataResolver>,
        resolver: Arc<dyn FunctionResolver>,
        config: EngineConfig,
    ) -> Self {
        Self {
            metadata,
            resolver,
            config: Arc::new(config),
            jobs: FxHashMap::default(),
            seq: 0,
        }
    }

    /// Pool specs the hosting actor system must provide before this actor
    /// can dispatch nodes.
    #[must_use]
    pub fn pool_specs(&self) -> Vec<crate::actors::PoolSpec> {
        self.config.pool_specs()
    }

    fn admit(
        &mut self,
        ctx: &mut ActorContext,
        kind: &'static str,
        processor: JobProcessor,
        callback: Option<ActorPath>,
        child: Option<(NodeId, ActorPath)>,
    ) -> Result<String, ActorError> {
        let key = processor.key.clone();
        let actor = format!("job-{}", self.seq);
        self.seq += 1;
        ctx.spawn(&actor, processor, DEFAULT_POOL)
            .map_err(ActorError::BadActor)?;
        self.jobs.insert(
            key.clone(),
            JobRecord {
                key: key.clone(),
                kind,
                actor,
                submitted: Utc::now(),
                finished: None,
                status: JobStatus::Running,
                result: None,
                error: None,
                callback,
                child,
            },
        );
        Ok(key)
    }

    fn submit_job(&mut self, ctx: &mut ActorContext, request: JobRequest) -> Result<(), ActorError> {
        let kind = request.config.definition.kind();
        let processor = JobProcessor::from_config(
            uuid_key(),
            request.config,
            Arc::clone(&self.metadata),
            Arc::clone(&self.resolver),
            Arc::clone(&self.config),
        );
        let key = self.admit(ctx, kind, processor, request.callback, None)?;
        info!(job = %key, kind, "job submitted");
        if let Some(sender) = ctx.sender().cloned() {
            self.reply(ctx, &sender, JOB_SUBMITTED, MessageArg::json(json!({ "key": key })));
        }
        Ok(())
    }

    fn submit_child_job(
        &mut self,
        ctx: &mut ActorContext,
        request: ChildJobRequest,
    ) -> Result<(), ActorError> {
        let processor = JobProcessor::from_graph(
            uuid_key(),
            request.graph,
            Arc::clone(&self.resolver),
            Arc::clone(&self.config),
        );
        let key = self.admit(
            ctx,
            "child_job",
            processor,
            None,
            Some((request.node, request.monitor)),
        )?;
        info!(job = %key, parent = %request.parent_key, "child job submitted");
        Ok(())
    }

    fn finish(&mut self, ctx: &ActorContext, key: &str, result: Result<Value, JobError>) {
        let Some(record) = self.jobs.get_mut(key) else {
            warn!(job = %key, "completion for a job the registry does not know");
            return;
        };
        record.finished = Some(Utc::now());
        match result {
            Ok(value) => {
                record.status = JobStatus::Succeeded;
                record.result = Some(value.clone());
                info!(job = %key, "job succeeded");
                if let Some((node, monitor)) = record.child.clone() {
                    self.reply(
                        ctx,
                        &monitor,
                        CHILD_JOB_SUCCEEDED,
                        MessageArg::payload(ChildJobOutcome {
                            node,
                            result: value.clone(),
                        }),
                    );
                }
                if let Some(callback) = self.jobs[key].callback.clone() {
                    self.reply(
                        ctx,
                        &callback,
                        JOB_SUCCEEDED,
                        MessageArg::payload(JobOutcome {
                            key: key.to_string(),
                            result: value,
                        }),
                    );
                }
            }
            Err(error) => {
                record.status = JobStatus::Failed;
                record.error = Some(error.clone());
                warn!(job = %key, %error, "job failed");
                if let Some((node, monitor)) = record.child.clone() {
                    let child_error = match &error {
                        JobError::Engine(engine) => engine.clone(),
                        other => EngineError::execution(&node, other),
                    };
                    self.reply(
                        ctx,
                        &monitor,
                        CHILD_JOB_FAILED,
                        MessageArg::payload(ChildJobFailure {
                            node,
                            error: child_error,
                        }),
                    );
                }
                if let Some(callback) = self.jobs[key].callback.clone() {
                    self.reply(
                        ctx,
                        &callback,
                        JOB_FAILED,
                        MessageArg::payload(JobFailure {
                            key: key.to_string(),
                            error,
                        }),
                    );
                }
            }
        }
    }

    fn reply(&self, ctx: &ActorContext, target: &ActorPath, name: &str, arg: MessageArg) {
        if let Err(error) = ctx.send(target, name, vec![arg]) {
            warn!(%target, message = name, %error, "notification dropped");
        }
    }
}

fn uuid_key() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[async_trait]
impl Actor for Engine {
    fn interface(&self) -> ActorInterface {
        ActorInterface::new(
            "Engine",
            vec![
                HandlerSpec::new(SUBMIT_JOB, vec![ParamSpec::payload::<JobRequest>("request")]),
                HandlerSpec::new(
                    SUBMIT_CHILD_JOB,
                    vec![ParamSpec::payload::<ChildJobRequest>("request")],
                ),
                HandlerSpec::new(GET_JOB_LIST, vec![]),
                HandlerSpec::new(
                    GET_JOB_DETAILS,
                    vec![
                        ParamSpec::required("key", ArgKind::Json),
                        ParamSpec::optional("verbose", ArgKind::Json),
                    ],
                ),
                HandlerSpec::new(
                    JOB_SUCCEEDED,
                    vec![ParamSpec::payload::<JobOutcome>("outcome")],
                ),
                HandlerSpec::new(
                    JOB_FAILED,
                    vec![ParamSpec::payload::<JobFailure>("failure")],
                ),
            ],
        )
    }

    #[instrument(skip_all, fields(message = %msg.name))]
    async fn on_message(&mut self, ctx: &mut ActorContext, msg: Message) -> Result<(), ActorError> {
        match msg.name.as_str() {
            SUBMIT_JOB => {
                let request = payload::<JobRequest>(&msg)?;
                self.submit_job(ctx, request)?;
            }
            SUBMIT_CHILD_JOB => {
                let request = payload::<ChildJobRequest>(&msg)?;
                self.submit_child_job(ctx, request)?;
            }
            JOB_SUCCEEDED => {
                let outcome = payload::<JobOutcome>(&msg)?;
                self.finish(ctx, &outcome.key.clone(), Ok(outcome.result));
            }
            JOB_FAILED => {
                let failure = payload::<JobFailure>(&msg)?;
                self.finish(ctx, &failure.key.clone(), Err(failure.error));
            }
            GET_JOB_LIST => {
                if let Some(sender) = ctx.sender().cloned() {
                    let mut jobs: Vec<&JobRecord> = self.jobs.values().collect();
                    jobs.sort_by(|a, b| a.submitted.cmp(&b.submitted).then(a.key.cmp(&b.key)));
                    let listing = Value::Array(jobs.iter().map(|j| j.summary()).collect());
                    self.reply(ctx, &sender, JOB_LIST, MessageArg::json(listing));
                }
            }
            GET_JOB_DETAILS => {
                let key = msg
                    .arg(0)
                    .and_then(MessageArg::as_str)
                    .ok_or_else(|| ActorError::failure("get_job_details needs a job key"))?
                    .to_string();
                let verbose = msg
                    .arg(1)
                    .and_then(MessageArg::as_json)
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                if let Some(sender) = ctx.sender().cloned() {
                    let details = self
                        .jobs
                        .get(&key)
                        .map(|record| {
                            if verbose {
                                record.details()
                            } else {
                                record.summary()
                            }
                        })
                        .unwrap_or(Value::Null);
                    self.reply(ctx, &sender, JOB_DETAILS, MessageArg::json(details));
                }
            }
            other => {
                return Err(ActorError::failure(format!(
                    "unexpected message '{other}' to the engine"
                )));
            }
        }
        Ok(())
    }

    async fn on_child_failed(
        &mut self,
        ctx: &mut ActorContext,
        origin: &ActorPath,
        error: &ActorError,
    ) -> Result<bool, ActorError> {
        // The origin is the deepest failed actor; map it back to its job
        // by the job processor subtree it sits in.
        let key = self
            .jobs
            .values()
            .find(|record| {
                record.status == JobStatus::Running
                    && origin.is_within(&ctx.path().child(record.actor.clone()))
            })
            .map(|record| record.key.clone());
        if let Some(key) = key {
            self.finish(ctx, &key, Err(JobError::from(error.clone())));
        } else {
            warn!(%origin, %error, "failure from an unrecognized engine child");
        }
        // The engine itself stays up whatever happens to individual jobs.
        Ok(true)
    }
}

/// One-job supervisor: builds the graph, runs it, relays the verdict.
struct JobProcessor {
    key: String,
    config: Option<JobConfig>,
    prebuilt: Option<Arc<Graph>>,
    metadata: Option<Arc<dyn MetadataResolver>>,
    resolver: Arc<dyn FunctionResolver>,
    engine_config: Arc<EngineConfig>,
}

impl JobProcessor {
    fn from_config(
        key: String,
        config: JobConfig,
        metadata: Arc<dyn MetadataResolver>,
        resolver: Arc<dyn FunctionResolver>,
        engine_config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            key,
            config: Some(config),
            prebuilt: None,
            metadata: Some(metadata),
            resolver,
            engine_config,
        }
    }

    fn from_graph(
        key: String,
        graph: Arc<Graph>,
        resolver: Arc<dyn FunctionResolver>,
        engine_config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            key,
            config: None,
            prebuilt: Some(graph),
            metadata: None,
            resolver,
            engine_config,
        }
    }

    fn abort(&self, ctx: &ActorContext, error: JobError) {
        if let Some(parent) = ctx.parent().cloned() {
            let failure = JobFailure {
                key: self.key.clone(),
                error,
            };
            if let Err(send_error) =
                ctx.send(&parent, JOB_FAILED, vec![MessageArg::payload(failure)])
            {
                warn!(job = %self.key, %send_error, "failed to report job abort");
            }
        }
        ctx.stop_self();
    }
}

#[async_trait]
impl Actor for JobProcessor {
    fn interface(&self) -> ActorInterface {
        ActorInterface::new(
            "JobProcessor",
            vec![
                HandlerSpec::new(
                    JOB_SUCCEEDED,
                    vec![ParamSpec::payload::<JobOutcome>("outcome")],
                ),
                HandlerSpec::new(
                    JOB_FAILED,
                    vec![ParamSpec::payload::<JobFailure>("failure")],
                ),
            ],
        )
    }

    #[instrument(skip_all, fields(job = %self.key))]
    async fn on_start(&mut self, ctx: &mut ActorContext) -> Result<(), ActorError> {
        let graph = match (self.prebuilt.take(), self.config.take(), &self.metadata) {
            (Some(graph), _, _) => graph,
            (None, Some(config), Some(metadata)) => {
                match build_job(&config, metadata.as_ref()) {
                    Ok(graph) => Arc::new(graph),
                    Err(error) => {
                        warn!(job = %self.key, %error, "job definition rejected");
                        self.abort(ctx, JobError::Validation(error));
                        return Ok(());
                    }
                }
            }
            _ => {
                self.abort(
                    ctx,
                    JobError::Runtime("job processor started without a job".into()),
                );
                return Ok(());
            }
        };

        let Some(engine) = ctx.parent().cloned() else {
            return Err(ActorError::failure("job processor needs an engine parent"));
        };
        let processor = GraphProcessor::new(
            self.key.clone(),
            &graph,
            Arc::clone(&self.resolver),
            Arc::clone(&self.engine_config),
            engine,
        );
        ctx.spawn("graphprocessor-0", processor, DEFAULT_POOL)
            .map_err(ActorError::BadActor)?;
        Ok(())
    }

    async fn on_message(&mut self, ctx: &mut ActorContext, msg: Message) -> Result<(), ActorError> {
        let Some(parent) = ctx.parent().cloned() else {
            return Err(ActorError::failure("job processor needs an engine parent"));
        };
        match msg.name.as_str() {
            JOB_SUCCEEDED | JOB_FAILED => {
                let Some(arg) = msg.arg(0).cloned() else {
                    return Err(ActorError::failure("job verdict carried no payload"));
                };
                ctx.send(&parent, &msg.name, vec![arg])
                    .map_err(ActorError::BadActor)?;
                ctx.stop_self();
                Ok(())
            }
            other => Err(ActorError::failure(format!(
                "unexpected message '{other}' to a job processor"
            ))),
        }
    }

    async fn on_child_failed(
        &mut self,
        ctx: &mut ActorContext,
        _origin: &ActorPath,
        error: &ActorError,
    ) -> Result<bool, ActorError> {
        self.abort(ctx, JobError::from(error.clone()));
        Ok(true)
    }
}

/// Extract the single opaque payload of a request or verdict message.
fn payload<T: Clone + Send + Sync + 'static>(msg: &Message) -> Result<T, ActorError> {
    msg.arg(0)
        .and_then(MessageArg::downcast::<T>)
        .map(|arc| T::clone(&arc))
        .ok_or_else(|| ActorError::failure(format!("message '{}' carried no payload", msg.name)))
}
