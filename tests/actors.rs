mod common;
use common::*;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use weft::actors::{
    Actor, ActorContext, ActorError, ActorInterface, ActorPath, ActorSystem, ArgKind,
    BadActorError, DEFAULT_POOL, HandlerSpec, Message, MessageArg, ParamSpec, PoolSpec,
};

/// Shared event log, ordered by occurrence.
#[derive(Clone, Default)]
struct Trace {
    events: Arc<Mutex<Vec<String>>>,
}

impl Trace {
    fn push(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    fn all(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn position(&self, event: &str) -> Option<usize> {
        self.events.lock().unwrap().iter().position(|e| e == event)
    }

    fn contains(&self, event: &str) -> bool {
        self.position(event).is_some()
    }
}

#[derive(Clone, Copy)]
enum ChildPolicy {
    Handle,
    Escalate,
    Blow,
}

/// Chain-spawning worker: each element of `policies` after the first
/// becomes one more descendant level.
struct Worker {
    trace: Trace,
    policies: Vec<ChildPolicy>,
}

impl Worker {
    fn new(trace: Trace, policies: Vec<ChildPolicy>) -> Self {
        Self { trace, policies }
    }
}

#[async_trait]
impl Actor for Worker {
    fn interface(&self) -> ActorInterface {
        ActorInterface::new(
            "Worker",
            vec![
                HandlerSpec::new("ping", vec![]),
                HandlerSpec::new("echo", vec![ParamSpec::required("text", ArgKind::Json)]),
                HandlerSpec::new("stop_parent", vec![]),
            ],
        )
    }

    async fn on_start(&mut self, ctx: &mut ActorContext) -> Result<(), ActorError> {
        self.trace.push(format!("start {}", ctx.path()));
        if self.policies.len() > 1 {
            let child = Worker::new(self.trace.clone(), self.policies[1..].to_vec());
            ctx.spawn("child", child, DEFAULT_POOL)?;
        }
        Ok(())
    }

    async fn on_stop(&mut self, ctx: &mut ActorContext) -> Result<(), ActorError> {
        self.trace.push(format!("stop {}", ctx.path()));
        Ok(())
    }

    async fn on_message(&mut self, ctx: &mut ActorContext, msg: Message) -> Result<(), ActorError> {
        match msg.name.as_str() {
            "ping" => Err(ActorError::failure("ping exploded")),
            "echo" => {
                let text = msg.arg(0).and_then(MessageArg::as_str).unwrap_or("");
                self.trace.push(format!("echo {text}"));
                Ok(())
            }
            "stop_parent" => {
                let parent = ctx.parent().cloned().unwrap();
                if let Err(error) = ctx.stop(&parent) {
                    self.trace.push(format!("stop refused: {error}"));
                }
                Ok(())
            }
            other => Err(ActorError::failure(format!("no such handler {other}"))),
        }
    }

    async fn on_child_failed(
        &mut self,
        ctx: &mut ActorContext,
        origin: &ActorPath,
        _error: &ActorError,
    ) -> Result<bool, ActorError> {
        self.trace
            .push(format!("{} saw failure from {origin}", ctx.path()));
        match self.policies[0] {
            ChildPolicy::Handle => Ok(true),
            ChildPolicy::Escalate => Ok(false),
            ChildPolicy::Blow => Err(ActorError::failure("handler blew up")),
        }
    }
}

fn chain(system: &ActorSystem, trace: &Trace, policies: Vec<ChildPolicy>) -> ActorPath {
    system
        .spawn_root("top", Worker::new(trace.clone(), policies), DEFAULT_POOL)
        .unwrap()
}

async fn wait_registered(system: &ActorSystem, path: &ActorPath) {
    let handle = system.handle();
    let path = path.clone();
    wait_until("actor registration", move || handle.is_registered(&path)).await;
}

#[tokio::test]
async fn stop_cascades_through_the_whole_tree() {
    init_test_tracing();
    let trace = Trace::default();
    let system = ActorSystem::new(vec![]);
    let top = chain(
        &system,
        &trace,
        vec![ChildPolicy::Handle, ChildPolicy::Handle, ChildPolicy::Handle],
    );
    let leaf = top.child("child").child("child");
    wait_registered(&system, &leaf).await;

    system.stop(&top).unwrap();
    system.wait_idle().await;

    let top_s = format!("stop {top}");
    let mid_s = format!("stop {}", top.child("child"));
    let leaf_s = format!("stop {leaf}");
    // Stop hooks run while the cascade descends; every level sees its own.
    assert!(trace.position(&top_s).unwrap() < trace.position(&mid_s).unwrap());
    assert!(trace.position(&mid_s).unwrap() < trace.position(&leaf_s).unwrap());
    assert!(system.fatal_error().is_none());
}

#[tokio::test]
async fn sends_are_validated_against_the_interface() {
    init_test_tracing();
    let trace = Trace::default();
    let system = ActorSystem::new(vec![]);
    let top = chain(&system, &trace, vec![ChildPolicy::Handle]);
    wait_registered(&system, &top).await;

    // Unknown message name.
    let err = system
        .send(&top, "frobnicate", vec![], Default::default())
        .unwrap_err();
    assert!(matches!(err, BadActorError::UnknownMessage { .. }));

    // Wrong argument kind for a declared handler.
    let err = system
        .send(&top, "echo", vec![MessageArg::path(top.clone())], Default::default())
        .unwrap_err();
    assert!(matches!(err, BadActorError::ArgumentMismatch { .. }));

    // A valid send goes through.
    system
        .send(&top, "echo", vec![MessageArg::json(json!("hello"))], Default::default())
        .unwrap();
    wait_until("echo delivery", || trace.contains("echo hello")).await;

    // Unknown targets are dropped, not errors: the target may have
    // legitimately stopped since the sender learned its address.
    let ghost = ActorPath::root().child("ghost");
    system
        .send(&ghost, "echo", vec![MessageArg::json(json!("x"))], Default::default())
        .unwrap();

    system.shutdown().await;
}

#[tokio::test]
async fn duplicate_names_and_unknown_pools_are_rejected() {
    init_test_tracing();
    let trace = Trace::default();
    let system = ActorSystem::new(vec![PoolSpec::new("extra", 2)]);

    let top = chain(&system, &trace, vec![ChildPolicy::Handle]);
    wait_registered(&system, &top).await;
    let err = system
        .spawn_root("top", Worker::new(trace.clone(), vec![ChildPolicy::Handle]), DEFAULT_POOL)
        .unwrap_err();
    assert!(matches!(err, BadActorError::DuplicateActor { .. }));

    let err = system
        .spawn_root(
            "elsewhere",
            Worker::new(trace.clone(), vec![ChildPolicy::Handle]),
            "no-such-pool",
        )
        .unwrap_err();
    assert!(matches!(err, BadActorError::UnknownPool { .. }));

    // The extra pool is usable.
    system
        .spawn_root("pooled", Worker::new(trace.clone(), vec![ChildPolicy::Handle]), "extra")
        .unwrap();

    system.shutdown().await;
}

#[tokio::test]
async fn children_may_not_stop_their_parents() {
    init_test_tracing();
    let trace = Trace::default();
    let system = ActorSystem::new(vec![]);
    let top = chain(&system, &trace, vec![ChildPolicy::Handle, ChildPolicy::Handle]);
    let mid = top.child("child");
    wait_registered(&system, &mid).await;

    system.send(&mid, "stop_parent", vec![], Default::default()).unwrap();
    wait_until("stop refusal", || {
        trace.all().iter().any(|e| e.starts_with("stop refused"))
    })
    .await;
    assert!(system.handle().is_registered(&top));

    system.shutdown().await;
}

#[tokio::test]
async fn failure_escalates_until_a_parent_claims_it() {
    init_test_tracing();
    let trace = Trace::default();
    let system = ActorSystem::new(vec![]);
    // Leaf fails, mid escalates, top claims.
    let top = chain(
        &system,
        &trace,
        vec![ChildPolicy::Handle, ChildPolicy::Escalate, ChildPolicy::Handle],
    );
    let mid = top.child("child");
    let leaf = mid.child("child");
    wait_registered(&system, &leaf).await;

    system.send(&leaf, "ping", vec![], Default::default()).unwrap();

    // The mid level goes down with the leaf; the claiming top survives.
    let handle = system.handle();
    {
        let mid = mid.clone();
        wait_until("mid teardown", move || !handle.is_registered(&mid)).await;
    }
    assert!(system.handle().is_registered(&top));
    assert!(system.fatal_error().is_none());

    // Both levels saw the original origin, not their direct child.
    assert!(trace.contains(&format!("{mid} saw failure from {leaf}")));
    assert!(trace.contains(&format!("{top} saw failure from {leaf}")));

    system.shutdown().await;
}

#[tokio::test]
async fn unclaimed_failure_is_fatal_to_the_system() {
    init_test_tracing();
    let trace = Trace::default();
    let system = ActorSystem::new(vec![]);
    let top = chain(&system, &trace, vec![ChildPolicy::Escalate, ChildPolicy::Escalate]);
    let leaf = top.child("child");
    wait_registered(&system, &leaf).await;

    system.send(&leaf, "ping", vec![], Default::default()).unwrap();
    wait_until("fatal error", || system.fatal_error().is_some()).await;

    let (origin, error) = system.fatal_error().unwrap();
    assert_eq!(origin, leaf);
    assert!(error.to_string().contains("ping exploded"));
}

#[tokio::test]
async fn failing_failure_handler_becomes_the_new_origin() {
    init_test_tracing();
    let trace = Trace::default();
    let system = ActorSystem::new(vec![]);
    // Leaf fails, mid's handler itself blows up, top claims.
    let top = chain(
        &system,
        &trace,
        vec![ChildPolicy::Handle, ChildPolicy::Blow, ChildPolicy::Handle],
    );
    let mid = top.child("child");
    let leaf = mid.child("child");
    wait_registered(&system, &leaf).await;

    system.send(&leaf, "ping", vec![], Default::default()).unwrap();
    wait_until("top sees mid as origin", || {
        trace.contains(&format!("{top} saw failure from {mid}"))
    })
    .await;
    assert!(system.handle().is_registered(&top));
    assert!(system.fatal_error().is_none());

    system.shutdown().await;
}
