//! Shared actor-side test plumbing: a recording probe and polling helpers.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use weft::actors::{
    Actor, ActorContext, ActorError, ActorInterface, ArgKind, HandlerSpec, Message, MessageArg,
    ParamSpec,
};
use weft::engine::{
    JOB_DETAILS, JOB_FAILED, JOB_LIST, JOB_SUBMITTED, JOB_SUCCEEDED, JobFailure, JobOutcome,
};

pub fn init_test_tracing() {
    weft::telemetry::init_tracing();
}

/// Shared log of everything a probe actor received.
#[derive(Clone, Default)]
pub struct Recorded {
    inner: Arc<Mutex<Vec<Message>>>,
}

impl Recorded {
    pub fn push(&self, msg: Message) {
        self.inner.lock().unwrap().push(msg);
    }

    pub fn all(&self) -> Vec<Message> {
        self.inner.lock().unwrap().clone()
    }

    pub fn find(&self, name: &str) -> Option<Message> {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.name == name)
            .cloned()
    }

    pub fn count(&self, name: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.name == name)
            .count()
    }
}

pub const RELAY: &str = "relay";

/// Records engine notifications; `relay` lets a test send a message with
/// the probe as its sender, so request/reply exchanges land back here.
pub struct Probe {
    log: Recorded,
}

impl Probe {
    pub fn new(log: Recorded) -> Self {
        Self { log }
    }
}

#[async_trait]
impl Actor for Probe {
    fn interface(&self) -> ActorInterface {
        ActorInterface::new(
            "Probe",
            vec![
                HandlerSpec::new(JOB_SUBMITTED, vec![ParamSpec::required("key", ArgKind::Json)]),
                HandlerSpec::new(
                    JOB_SUCCEEDED,
                    vec![ParamSpec::payload::<JobOutcome>("outcome")],
                ),
                HandlerSpec::new(
                    JOB_FAILED,
                    vec![ParamSpec::payload::<JobFailure>("failure")],
                ),
                HandlerSpec::new(JOB_LIST, vec![ParamSpec::required("jobs", ArgKind::Json)]),
                HandlerSpec::new(
                    JOB_DETAILS,
                    vec![ParamSpec::required("details", ArgKind::Json)],
                ),
                HandlerSpec::new(
                    RELAY,
                    vec![
                        ParamSpec::required("target", ArgKind::Path),
                        ParamSpec::required("message", ArgKind::Json),
                        ParamSpec::optional("arg", ArgKind::Json),
                        ParamSpec::optional("extra", ArgKind::Json),
                    ],
                ),
            ],
        )
    }

    async fn on_message(&mut self, ctx: &mut ActorContext, msg: Message) -> Result<(), ActorError> {
        if msg.name == RELAY {
            let target = msg
                .arg(0)
                .and_then(MessageArg::as_path)
                .cloned()
                .ok_or_else(|| ActorError::failure("relay needs a target path"))?;
            let name = msg
                .arg(1)
                .and_then(MessageArg::as_str)
                .ok_or_else(|| ActorError::failure("relay needs a message name"))?
                .to_string();
            let args: Vec<MessageArg> = msg.args.iter().skip(2).cloned().collect();
            ctx.send(&target, &name, args)?;
            return Ok(());
        }
        self.log.push(msg);
        Ok(())
    }
}

/// Poll until `cond` holds, failing the test after five seconds.
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}
