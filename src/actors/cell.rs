//! Runtime cell owning one actor and its lifecycle state machine.
//!
//! A cell lives on exactly one event loop and processes its queue items
//! strictly in order. It drives the actor through
//! `NotStarted -> Starting -> Running -> Stopping -> Stopped`, with `Error`
//! and `Failed` as the terminal branch for handler errors. Stops cascade to
//! children and complete bottom-up; failures propagate to the parent unless
//! the parent claims them.

use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use super::actor::{Actor, ActorContext, ActorError, ActorState};
use super::address::ActorPath;
use super::message::{Message, Signal};
use super::system::SystemHandle;

pub(crate) struct ActorCell {
    path: ActorPath,
    parent: Option<ActorPath>,
    actor: Box<dyn Actor>,
    state: ActorState,
    children: FxHashSet<ActorPath>,
    failure_cause: Option<(ActorPath, ActorError)>,
    terminated: bool,
}

impl ActorCell {
    pub(crate) fn new(path: ActorPath, parent: Option<ActorPath>, actor: Box<dyn Actor>) -> Self {
        Self {
            path,
            parent,
            actor,
            state: ActorState::NotStarted,
            children: FxHashSet::default(),
            failure_cause: None,
            terminated: false,
        }
    }

    pub(crate) fn path(&self) -> &ActorPath {
        &self.path
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated
    }

    fn context(&self, system: &SystemHandle, sender: Option<ActorPath>) -> ActorContext {
        ActorContext::new(
            system.clone(),
            self.path.clone(),
            self.parent.clone(),
            sender,
        )
    }

    /// Fold context mutations from a finished handler back into the cell:
    /// newly spawned children are recorded, and a recorded failure (or a
    /// returned error) moves the cell onto the error branch.
    async fn absorb(
        &mut self,
        system: &SystemHandle,
        ctx: ActorContext,
        outcome: Result<(), ActorError>,
    ) {
        for child in ctx.spawned {
            self.children.insert(child);
        }
        let error = match outcome {
            Err(error) => Some(error),
            Ok(()) => ctx.failure,
        };
        if let Some(error) = error {
            self.enter_error(system, self.path.clone(), error).await;
        }
    }

    pub(crate) async fn handle_message(&mut self, system: &SystemHandle, msg: Message) {
        if self.state != ActorState::Running {
            warn!(
                actor = %self.path,
                message = %msg.name,
                state = ?self.state,
                "dropping message to non-running actor"
            );
            return;
        }
        let mut ctx = self.context(system, Some(msg.sender.clone()));
        let outcome = self.actor.on_message(&mut ctx, msg).await;
        self.absorb(system, ctx, outcome).await;
    }

    pub(crate) async fn handle_signal(
        &mut self,
        system: &SystemHandle,
        from: Option<ActorPath>,
        signal: Signal,
    ) {
        match signal {
            Signal::Start => self.handle_start(system).await,
            Signal::Stop => self.handle_stop(system).await,
            Signal::Started => {
                // Informational; the parent does not gate on child startup.
                debug!(actor = %self.path, child = ?from, "child started");
            }
            Signal::Stopped => {
                if let Some(child) = from {
                    self.child_gone(system, &child).await;
                }
            }
            Signal::Failed { origin, error } => {
                self.handle_child_failed(system, from, origin, error).await;
            }
        }
    }

    async fn handle_start(&mut self, system: &SystemHandle) {
        if self.state != ActorState::NotStarted {
            warn!(actor = %self.path, state = ?self.state, "ignoring duplicate start");
            return;
        }
        self.state = ActorState::Starting;
        let mut ctx = self.context(system, None);
        let outcome = self.actor.on_start(&mut ctx).await;
        let failed = outcome.is_err() || ctx.failure.is_some();
        self.absorb(system, ctx, outcome).await;
        if !failed {
            self.state = ActorState::Running;
            if let Some(parent) = &self.parent {
                system.send_signal(Some(self.path.clone()), parent, Signal::Started);
            }
        }
    }

    async fn handle_stop(&mut self, system: &SystemHandle) {
        match self.state {
            ActorState::NotStarted | ActorState::Starting | ActorState::Running => {}
            _ => {
                debug!(actor = %self.path, state = ?self.state, "ignoring stop");
                return;
            }
        }
        self.state = ActorState::Stopping;
        let mut ctx = self.context(system, None);
        if let Err(error) = self.actor.on_stop(&mut ctx).await {
            // A failing stop hook does not abort the stop.
            warn!(actor = %self.path, %error, "error in stop hook");
        }
        for child in ctx.spawned {
            self.children.insert(child);
        }
        self.cascade_stop(system).await;
    }

    async fn handle_child_failed(
        &mut self,
        system: &SystemHandle,
        from: Option<ActorPath>,
        origin: ActorPath,
        error: ActorError,
    ) {
        if let Some(child) = from.clone() {
            self.children.remove(&child);
        }
        if self.state == ActorState::Stopping || self.state == ActorState::Error {
            // Already tearing down; the failed child only counts toward
            // completion of the cascade.
            self.maybe_finish(system).await;
            return;
        }
        if self.state != ActorState::Running {
            warn!(actor = %self.path, %origin, "failure signal outside running state");
            return;
        }
        let mut ctx = self.context(system, from);
        let outcome = self.actor.on_child_failed(&mut ctx, &origin, &error).await;
        for child in ctx.spawned {
            self.children.insert(child);
        }
        match outcome {
            Ok(true) => {
                debug!(actor = %self.path, %origin, "child failure handled");
                if let Some(failure) = ctx.failure {
                    self.enter_error(system, self.path.clone(), failure).await;
                }
            }
            Ok(false) => {
                // Unhandled; the original origin and cause travel upward.
                self.enter_error(system, origin, error).await;
            }
            Err(handler_error) => {
                self.enter_error(system, self.path.clone(), handler_error)
                    .await;
            }
        }
    }

    async fn enter_error(&mut self, system: &SystemHandle, origin: ActorPath, error: ActorError) {
        if matches!(
            self.state,
            ActorState::Error | ActorState::Failed | ActorState::Stopped
        ) {
            return;
        }
        self.state = ActorState::Error;
        if self.failure_cause.is_none() {
            self.failure_cause = Some((origin, error));
        }
        self.cascade_stop(system).await;
    }

    /// Stop every known child, then finish once all of them have reported
    /// back. Terminated children are pruned eagerly so a cell never waits
    /// on an address that will not answer.
    async fn cascade_stop(&mut self, system: &SystemHandle) {
        let children: Vec<ActorPath> = self.children.iter().cloned().collect();
        for child in children {
            if !system.is_registered(&child) {
                self.children.remove(&child);
                continue;
            }
            system.send_signal(Some(self.path.clone()), &child, Signal::Stop);
        }
        self.maybe_finish(system).await;
    }

    async fn child_gone(&mut self, system: &SystemHandle, child: &ActorPath) {
        self.children.remove(child);
        self.maybe_finish(system).await;
    }

    async fn maybe_finish(&mut self, system: &SystemHandle) {
        if !self.children.is_empty() {
            return;
        }
        match self.state {
            ActorState::Stopping => self.finish(system, ActorState::Stopped),
            ActorState::Error => self.finish(system, ActorState::Failed),
            _ => {}
        }
    }

    fn finish(&mut self, system: &SystemHandle, terminal: ActorState) {
        self.state = terminal;
        self.terminated = true;
        system.unregister(&self.path);
        match (&self.parent, self.failure_cause.take()) {
            (Some(parent), Some((origin, error))) => {
                system.send_signal(
                    Some(self.path.clone()),
                    parent,
                    Signal::Failed { origin, error },
                );
            }
            (Some(parent), None) => {
                system.send_signal(Some(self.path.clone()), parent, Signal::Stopped);
            }
            (None, Some((origin, error))) => {
                // Unhandled failure reached the root: the system as a whole
                // is considered broken.
                system.report_fatal(origin, error);
            }
            (None, None) => {
                debug!(actor = %self.path, "root actor stopped");
            }
        }
    }
}
