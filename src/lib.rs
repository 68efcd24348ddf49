//! # Weft: actor-based graph execution for data and model jobs
//!
//! Weft turns declarative job definitions into dependency graphs and
//! executes them on a small hierarchical actor runtime.
//!
//! ## Core concepts
//!
//! - **Actors**: supervised, addressable units with validated messaging
//! - **Graph**: immutable nodes with derived dependency edges
//! - **Builder**: pure compilation from job definitions to graphs
//! - **Engine**: job intake, per-job graph processors, pooled node work
//!
//! ## Compiling a job
//!
//! Graph construction is synchronous and needs no runtime:
//!
//! ```
//! use serde_json::json;
//! use weft::builder::build_job;
//! use weft::meta::{JobConfig, JobDefinition, StaticResolver};
//!
//! # fn main() -> miette::Result<()> {
//! let config = JobConfig::new(JobDefinition::ImportData {
//!     source: json!({"path": "weather.parquet"}),
//!     target: json!({"table": "weather"}),
//! });
//! let graph = build_job(&config, &StaticResolver::new())?;
//! assert!(graph.nodes().contains_key(graph.root()));
//! # Ok(())
//! # }
//! ```
//!
//! ## Running jobs
//!
//! The engine is an ordinary actor; submissions are messages:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use weft::actors::{ActorSystem, DEFAULT_POOL, MessageArg};
//! use weft::engine::{Engine, EngineConfig, JobRequest, StandardResolver, SUBMIT_JOB};
//! use weft::meta::{JobConfig, JobDefinition, StaticResolver};
//!
//! #[tokio::main]
//! async fn main() -> miette::Result<()> {
//!     weft::telemetry::init_tracing();
//!
//!     let engine = Engine::new(
//!         Arc::new(StaticResolver::new()),
//!         Arc::new(StandardResolver::new()),
//!         EngineConfig::default(),
//!     );
//!     let system = ActorSystem::new(engine.pool_specs());
//!     let engine_path = system.spawn_root("engine", engine, DEFAULT_POOL)?;
//!
//!     let request = JobRequest {
//!         config: JobConfig::new(JobDefinition::ImportData {
//!             source: json!({"path": "weather.parquet"}),
//!             target: json!({"table": "weather"}),
//!         }),
//!         callback: None,
//!     };
//!     system.send(
//!         &engine_path,
//!         SUBMIT_JOB,
//!         vec![MessageArg::payload(request)],
//!         Default::default(),
//!     )?;
//!
//!     system.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod actors;
pub mod builder;
pub mod engine;
pub mod errors;
pub mod graph;
pub mod meta;
pub mod telemetry;
