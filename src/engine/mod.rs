//! Graph execution on top of the actor runtime.
//!
//! The [`Engine`] actor takes [`JobConfig`](crate::meta::JobConfig)
//! submissions, builds them into graphs and supervises one graph processor
//! per job. Node work runs on category-specific event-loop pools declared
//! through [`EngineConfig`].

mod config;
mod context;
#[allow(clippy::module_inception)]
mod engine;
mod functions;
mod node_processor;
mod processor;

pub use config::EngineConfig;
pub use context::{EngineContext, EngineNode, NodeState};
pub use engine::{
    Engine, GET_JOB_DETAILS, GET_JOB_LIST, JOB_DETAILS, JOB_FAILED, JOB_LIST, JOB_SUBMITTED,
    JOB_SUCCEEDED, JobError, JobFailure, JobOutcome, JobRequest, SUBMIT_JOB,
};
pub use functions::{
    DataHandler, ExecContext, FunctionOutcome, FunctionResolver, GraphUpdate, ModelRunner,
    NodeFunction, StandardResolver, UpdateEdge,
};
