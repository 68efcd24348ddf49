//! The graph processor: one actor owning one executing graph.
//!
//! The processor is the single writer of its [`EngineContext`]. A
//! scheduling pass walks the pending set: nodes with a failed non-tolerant
//! dependency are failed without dispatch, nodes whose immediate
//! dependencies have all succeeded get a dedicated short-lived node
//! processor on the pool their category maps to. Passes repeat while
//! failure propagation is still discovering newly failed nodes, then the
//! termination check either reports the job result, aggregates the
//! recorded errors, or diagnoses a deadlock.

use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::actors::{
    Actor, ActorContext, ActorError, ActorInterface, ActorPath, HandlerSpec, Message, MessageArg,
    ParamSpec,
};
use crate::errors::EngineError;
use crate::graph::{Graph, NodeDetails, NodeId, ResultType};

use super::config::EngineConfig;
use super::context::{EngineContext, NodeState};
use super::engine::{self, ChildJobRequest, JobFailure, JobOutcome};
use super::functions::{ExecContext, FunctionResolver, GraphUpdate};
use super::node_processor::NodeProcessor;

pub(crate) const NODE_SUCCEEDED: &str = "node_succeeded";
pub(crate) const NODE_FAILED: &str = "node_failed";
pub(crate) const CHILD_JOB_SUCCEEDED: &str = "child_job_succeeded";
pub(crate) const CHILD_JOB_FAILED: &str = "child_job_failed";

/// Completion report of one node processor.
#[derive(Clone, Debug)]
pub(crate) struct NodeOutcome {
    pub id: NodeId,
    pub value: Value,
    pub update: Option<GraphUpdate>,
}

#[derive(Clone, Debug)]
pub(crate) struct NodeFailure {
    pub id: NodeId,
    pub error: EngineError,
}

/// Completion of a child job, reported by the engine to the monitoring
/// graph processor.
#[derive(Clone, Debug)]
pub(crate) struct ChildJobOutcome {
    pub node: NodeId,
    pub result: Value,
}

#[derive(Clone, Debug)]
pub(crate) struct ChildJobFailure {
    pub node: NodeId,
    pub error: EngineError,
}

pub(crate) struct GraphProcessor {
    job_key: String,
    context: EngineContext,
    watch_tx: watch::Sender<Arc<EngineContext>>,
    resolver: Arc<dyn FunctionResolver>,
    config: Arc<EngineConfig>,
    /// The engine actor, for handing child-job graphs back up.
    engine: ActorPath,
    seq: u64,
    /// Actor name of each live node processor, for mapping actor failures
    /// back to their node.
    active_procs: FxHashMap<String, NodeId>,
    done: bool,
}

impl GraphProcessor {
    pub(crate) fn new(
        job_key: String,
        graph: &Graph,
        resolver: Arc<dyn FunctionResolver>,
        config: Arc<EngineConfig>,
        engine: ActorPath,
    ) -> Self {
        let context = EngineContext::from_graph(graph);
        let (watch_tx, _) = watch::channel(Arc::new(context.clone()));
        Self {
            job_key,
            context,
            watch_tx,
            resolver,
            config,
            engine,
            seq: 0,
            active_procs: FxHashMap::default(),
            done: false,
        }
    }

    fn publish(&self) {
        self.watch_tx.send_replace(Arc::new(self.context.clone()));
    }

    /// Repeated scheduling passes until no pass discovers a new failure,
    /// then the termination check.
    fn run_passes(&mut self, actx: &mut ActorContext) {
        if self.done {
            return;
        }
        loop {
            self.context.evict_stale();
            let (to_fail, to_dispatch) = pass_decisions(&self.context);
            let mut newly_failed = !to_fail.is_empty();
            for (id, error) in to_fail {
                debug!(node = %id, %error, "skipping node, upstream failure");
                self.context.mark_failed(&id, error);
            }
            for id in to_dispatch {
                if let Err(error) = self.dispatch(actx, &id) {
                    warn!(node = %id, %error, "dispatch failed");
                    self.context.mark_failed(&id, error);
                    newly_failed = true;
                }
            }
            if !newly_failed {
                break;
            }
        }
        self.publish();
        self.check_termination(actx);
    }

    fn dispatch(&mut self, actx: &mut ActorContext, id: &NodeId) -> Result<(), EngineError> {
        let node = self
            .context
            .node(id)
            .ok_or_else(|| EngineError::UnknownNode { id: id.to_string() })?
            .node()
            .clone();
        self.context.mark_active(id);

        if let NodeDetails::ChildJob { graph, .. } = node.details() {
            let request = ChildJobRequest {
                parent_key: self.job_key.clone(),
                node: id.clone(),
                graph: Arc::clone(graph),
                monitor: actx.path().clone(),
            };
            actx.send(
                &self.engine,
                engine::SUBMIT_CHILD_JOB,
                vec![MessageArg::payload(request)],
            )
            .map_err(|error| EngineError::execution(id, error))?;
            return Ok(());
        }

        let function = self.resolver.resolve(&node)?;
        let exec = ExecContext::new(Arc::new(self.context.clone()), self.watch_tx.subscribe());
        let name = format!("nodeprocessor-{}", self.seq);
        self.seq += 1;
        let pool = self.config.pool_for(node.category()).to_string();
        actx.spawn(&name, NodeProcessor::new(id.clone(), function, exec), &pool)
            .map_err(|error| EngineError::execution(id, error))?;
        self.active_procs.insert(name, id.clone());
        Ok(())
    }

    fn complete_node(&mut self, actx: &mut ActorContext, outcome: NodeOutcome) {
        self.active_procs.retain(|_, id| *id != outcome.id);

        if let Some(update) = outcome.update {
            if let Err(error) = validate_update(&self.context, &outcome.id, &update) {
                warn!(node = %outcome.id, %error, "rejected dynamic graph update");
                self.context.mark_failed(&outcome.id, error);
                self.run_passes(actx);
                return;
            }
            for node in update.nodes {
                self.context.insert_pending(node);
            }
            for edge in update.edges {
                self.context
                    .add_dependency(&edge.dependent, edge.dependency, edge.dep_type);
            }
        }

        let node = self.context.node(&outcome.id).map(|n| n.node().clone());
        self.context.mark_succeeded(&outcome.id, outcome.value.clone());

        if let Some(node) = node {
            if let Some(namespace) = node.bundle() {
                if let Value::Object(items) = &outcome.value {
                    for (key, value) in items {
                        self.context.insert_completed(
                            NodeId::new(key.clone(), namespace.clone(), ResultType::Any),
                            value.clone(),
                        );
                    }
                }
            }
            if let NodeDetails::ContextPop { closing, .. } = node.details() {
                // The popped outputs are copied out as this node's result;
                // everything inside the closed namespace goes away.
                self.context.remove_namespace(closing);
            }
        }

        self.run_passes(actx);
    }

    fn fail_node(&mut self, actx: &mut ActorContext, failure: NodeFailure) {
        self.active_procs.retain(|_, id| *id != failure.id);
        self.context.mark_failed(&failure.id, failure.error);
        self.run_passes(actx);
    }

    fn check_termination(&mut self, actx: &mut ActorContext) {
        if self.done || self.context.has_active() {
            return;
        }
        if self.context.has_pending() {
            let pending = self.context.pending_ids();
            let first = pending
                .first()
                .map(ToString::to_string)
                .unwrap_or_default();
            self.report_failure(
                actx,
                EngineError::Deadlock {
                    count: pending.len(),
                    first,
                },
            );
        } else if self.context.has_failures() {
            let error = EngineError::aggregate(self.context.failure_errors());
            self.report_failure(actx, error);
        } else {
            let root = self.context.root().clone();
            match self.context.lookup(&root) {
                Ok(value) => self.report_success(actx, value),
                Err(error) => self.report_failure(actx, error),
            }
        }
    }

    fn report_success(&mut self, actx: &mut ActorContext, result: Value) {
        self.done = true;
        info!(job = %self.job_key, "graph complete");
        self.reply(
            actx,
            engine::JOB_SUCCEEDED,
            MessageArg::payload(JobOutcome {
                key: self.job_key.clone(),
                result,
            }),
        );
        actx.stop_self();
    }

    fn report_failure(&mut self, actx: &mut ActorContext, error: EngineError) {
        self.done = true;
        warn!(job = %self.job_key, %error, "graph failed");
        self.reply(
            actx,
            engine::JOB_FAILED,
            MessageArg::payload(JobFailure {
                key: self.job_key.clone(),
                error: error.into(),
            }),
        );
        actx.stop_self();
    }

    fn reply(&self, actx: &ActorContext, name: &str, arg: MessageArg) {
        let Some(parent) = actx.parent().cloned() else {
            warn!(job = %self.job_key, "graph processor has no parent to report to");
            return;
        };
        if let Err(error) = actx.send(&parent, name, vec![arg]) {
            warn!(job = %self.job_key, %error, "failed to report job completion");
        }
    }
}

/// One scheduling pass over the pending set: nodes to fail because a
/// non-tolerant dependency failed, and nodes whose immediate dependencies
/// have all succeeded, in stable order.
fn pass_decisions(context: &EngineContext) -> (Vec<(NodeId, EngineError)>, Vec<NodeId>) {
    let mut to_fail: Vec<(NodeId, EngineError)> = Vec::new();
    let mut to_dispatch: Vec<NodeId> = Vec::new();
    for id in context.pending_ids() {
        let Some(deps) = context.dependencies(&id) else {
            continue;
        };
        let failed_dep = deps.iter().find(|(dep, dep_type)| {
            !dep_type.tolerant && context.state_of(dep) == Some(NodeState::Failed)
        });
        if let Some((dep, _)) = failed_dep {
            to_fail.push((
                id.clone(),
                EngineError::UpstreamFailure {
                    id: id.to_string(),
                    dependency: dep.to_string(),
                },
            ));
            continue;
        }
        // An immediate dependency is resolved by success, or by failure
        // when the edge tolerates it.
        let viable = deps.iter().all(|(dep, dep_type)| {
            !dep_type.immediate
                || match context.state_of(dep) {
                    Some(NodeState::Succeeded) => true,
                    Some(NodeState::Failed) => dep_type.tolerant,
                    _ => false,
                }
        });
        if viable {
            to_dispatch.push(id);
        }
    }
    (to_fail, to_dispatch)
}

/// Check a proposed update against the live graph without touching it.
fn validate_update(
    context: &EngineContext,
    origin: &NodeId,
    update: &GraphUpdate,
) -> Result<(), EngineError> {
    let mut new_ids: FxHashSet<NodeId> = FxHashSet::default();
    for node in &update.nodes {
        if context.contains(node.id()) || !new_ids.insert(node.id().clone()) {
            return Err(EngineError::UpdateCollision {
                origin: origin.to_string(),
                id: node.id().to_string(),
            });
        }
    }
    for edge in &update.edges {
        let dependent_pending = new_ids.contains(&edge.dependent)
            || context.state_of(&edge.dependent) == Some(NodeState::Pending);
        if !dependent_pending {
            return Err(EngineError::UpdateBadEdge {
                origin: origin.to_string(),
                detail: format!("dependent {} is not pending", edge.dependent),
            });
        }
        if !new_ids.contains(&edge.dependency) && !context.contains(&edge.dependency) {
            return Err(EngineError::UpdateBadEdge {
                origin: origin.to_string(),
                detail: format!(
                    "dependency {} is neither in the graph nor in the update",
                    edge.dependency
                ),
            });
        }
    }
    Ok(())
}

#[async_trait]
impl Actor for GraphProcessor {
    fn interface(&self) -> ActorInterface {
        ActorInterface::new(
            "GraphProcessor",
            vec![
                HandlerSpec::new(
                    NODE_SUCCEEDED,
                    vec![ParamSpec::payload::<NodeOutcome>("outcome")],
                ),
                HandlerSpec::new(
                    NODE_FAILED,
                    vec![ParamSpec::payload::<NodeFailure>("failure")],
                ),
                HandlerSpec::new(
                    CHILD_JOB_SUCCEEDED,
                    vec![ParamSpec::payload::<ChildJobOutcome>("outcome")],
                ),
                HandlerSpec::new(
                    CHILD_JOB_FAILED,
                    vec![ParamSpec::payload::<ChildJobFailure>("failure")],
                ),
            ],
        )
    }

    #[instrument(skip_all, fields(job = %self.job_key))]
    async fn on_start(&mut self, ctx: &mut ActorContext) -> Result<(), ActorError> {
        debug!(nodes = self.context.pending_ids().len(), "graph processing starts");
        self.publish();
        self.run_passes(ctx);
        Ok(())
    }

    async fn on_message(&mut self, ctx: &mut ActorContext, msg: Message) -> Result<(), ActorError> {
        if self.done {
            debug!(message = %msg.name, "ignoring message after completion");
            return Ok(());
        }
        match msg.name.as_str() {
            NODE_SUCCEEDED => {
                let outcome = payload::<NodeOutcome>(&msg)?;
                self.complete_node(ctx, outcome);
            }
            NODE_FAILED => {
                let failure = payload::<NodeFailure>(&msg)?;
                self.fail_node(ctx, failure);
            }
            CHILD_JOB_SUCCEEDED => {
                let outcome = payload::<ChildJobOutcome>(&msg)?;
                self.complete_node(
                    ctx,
                    NodeOutcome {
                        id: outcome.node,
                        value: outcome.result,
                        update: None,
                    },
                );
            }
            CHILD_JOB_FAILED => {
                let failure = payload::<ChildJobFailure>(&msg)?;
                self.fail_node(
                    ctx,
                    NodeFailure {
                        id: failure.node,
                        error: failure.error,
                    },
                );
            }
            other => {
                return Err(ActorError::failure(format!(
                    "unexpected message '{other}' to a graph processor"
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
        let name = origin.name().unwrap_or_default().to_string();
        if let Some(node_id) = self.active_procs.remove(&name) {
            warn!(node = %node_id, %error, "node processor failed as an actor");
            self.context
                .mark_failed(&node_id, EngineError::execution(&node_id, error));
            self.run_passes(ctx);
            return Ok(true);
        }
        Ok(false)
    }
}

/// Extract the single opaque payload of a completion message.
fn payload<T: Clone + Send + Sync + 'static>(msg: &Message) -> Result<T, ActorError> {
    msg.arg(0)
        .and_then(MessageArg::downcast::<T>)
        .map(|arc| T::clone(&arc))
        .ok_or_else(|| ActorError::failure(format!("message '{}' carried no payload", msg.name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DependencyType, Node, NodeDetails};
    use crate::engine::functions::UpdateEdge;
    use serde_json::json;

    fn id(name: &str) -> NodeId {
        NodeId::rooted(name, ResultType::Any)
    }

    fn context() -> EngineContext {
        let a = Node::new(id("a"), NodeDetails::StaticValue { value: json!(1) });
        let b = Node::new(id("b"), NodeDetails::Identity { source: id("a") });
        let mut nodes = FxHashMap::default();
        nodes.insert(a.id().clone(), a);
        nodes.insert(b.id().clone(), b);
        EngineContext::from_graph(&Graph::new(nodes, id("b")))
    }

    #[test]
    fn pass_fails_dependents_of_non_tolerant_failures() {
        let mut ctx = context();
        ctx.mark_active(&id("a"));
        ctx.mark_failed(&id("a"), EngineError::execution("a", "boom"));
        let (to_fail, to_dispatch) = pass_decisions(&ctx);
        assert_eq!(to_fail.len(), 1);
        assert_eq!(to_fail[0].0, id("b"));
        assert!(matches!(to_fail[0].1, EngineError::UpstreamFailure { .. }));
        assert!(to_dispatch.is_empty());
    }

    #[test]
    fn tolerant_dependents_survive_upstream_failure() {
        let a = Node::new(id("a"), NodeDetails::StaticValue { value: json!(1) });
        let b = Node::new(id("b"), NodeDetails::StaticValue { value: json!(2) })
            .with_dependency(id("a"), DependencyType::TOLERANT);
        let mut nodes = FxHashMap::default();
        nodes.insert(a.id().clone(), a);
        nodes.insert(b.id().clone(), b);
        let mut ctx = EngineContext::from_graph(&Graph::new(nodes, id("b")));
        ctx.mark_active(&id("a"));
        ctx.mark_failed(&id("a"), EngineError::execution("a", "boom"));

        let (to_fail, to_dispatch) = pass_decisions(&ctx);
        assert!(to_fail.is_empty());
        // Tolerant is still immediate: the failed dependency counts as
        // resolved, so the dependent dispatches.
        assert_eq!(to_dispatch, vec![id("b")]);
    }

    #[test]
    fn deferred_dependencies_do_not_block_dispatch() {
        let a = Node::new(id("a"), NodeDetails::StaticValue { value: json!(1) });
        let b = Node::new(id("b"), NodeDetails::StaticValue { value: json!(2) })
            .with_dependency(id("a"), DependencyType::SOFT);
        let mut nodes = FxHashMap::default();
        nodes.insert(a.id().clone(), a);
        nodes.insert(b.id().clone(), b);
        let ctx = EngineContext::from_graph(&Graph::new(nodes, id("b")));

        let (to_fail, to_dispatch) = pass_decisions(&ctx);
        assert!(to_fail.is_empty());
        assert_eq!(to_dispatch, vec![id("a"), id("b")]);
    }

    #[test]
    fn unsatisfiable_dependencies_leave_the_pass_empty() {
        // Mutually dependent pending nodes: nothing dispatches, nothing
        // fails, nothing is active. That state is what the processor
        // reports as a deadlock.
        let a = Node::new(id("a"), NodeDetails::StaticValue { value: json!(1) })
            .with_dependency(id("b"), DependencyType::HARD);
        let b = Node::new(id("b"), NodeDetails::StaticValue { value: json!(2) })
            .with_dependency(id("a"), DependencyType::HARD);
        let mut nodes = FxHashMap::default();
        nodes.insert(a.id().clone(), a);
        nodes.insert(b.id().clone(), b);
        let ctx = EngineContext::from_graph(&Graph::new(nodes, id("b")));

        let (to_fail, to_dispatch) = pass_decisions(&ctx);
        assert!(to_fail.is_empty());
        assert!(to_dispatch.is_empty());
        assert!(ctx.has_pending() && !ctx.has_active());
    }

    #[test]
    fn update_rejects_colliding_node_id() {
        let ctx = context();
        let update = GraphUpdate {
            nodes: vec![Node::new(
                id("a"),
                NodeDetails::StaticValue { value: json!(2) },
            )],
            edges: vec![],
        };
        assert!(matches!(
            validate_update(&ctx, &id("b"), &update),
            Err(EngineError::UpdateCollision { .. })
        ));
    }

    #[test]
    fn update_rejects_edge_to_non_pending_dependent() {
        let mut ctx = context();
        ctx.mark_active(&id("b"));
        let update = GraphUpdate {
            nodes: vec![Node::new(
                id("c"),
                NodeDetails::StaticValue { value: json!(3) },
            )],
            edges: vec![UpdateEdge {
                dependent: id("b"),
                dependency: id("c"),
                dep_type: DependencyType::HARD,
            }],
        };
        assert!(matches!(
            validate_update(&ctx, &id("b"), &update),
            Err(EngineError::UpdateBadEdge { .. })
        ));
    }

    #[test]
    fn update_rejects_unknown_dependency() {
        let ctx = context();
        let update = GraphUpdate {
            nodes: vec![],
            edges: vec![UpdateEdge {
                dependent: id("b"),
                dependency: id("ghost"),
                dep_type: DependencyType::HARD,
            }],
        };
        assert!(matches!(
            validate_update(&ctx, &id("b"), &update),
            Err(EngineError::UpdateBadEdge { .. })
        ));
    }

    #[test]
    fn update_accepts_new_nodes_feeding_pending_ones() {
        let ctx = context();
        let update = GraphUpdate {
            nodes: vec![Node::new(
                id("c"),
                NodeDetails::StaticValue { value: json!(3) },
            )],
            edges: vec![UpdateEdge {
                dependent: id("b"),
                dependency: id("c"),
                dep_type: DependencyType::HARD,
            }],
        };
        assert!(validate_update(&ctx, &id("a"), &update).is_ok());
    }
}
