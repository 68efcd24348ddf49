//! The actor trait, execution context and lifecycle states.

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

use super::address::ActorPath;
use super::interface::{ActorInterface, BadActorError};
use super::message::{Message, MessageArg};
use super::system::SystemHandle;

/// Lifecycle state of a runtime actor.
///
/// Owned exclusively by the runtime cell wrapping the actor; mutated only
/// in response to a signal or to an error raised while handling a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActorState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
    Failed,
}

impl ActorState {
    /// States in which the actor participates in a parent's stop cascade.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ActorState::Starting | ActorState::Running | ActorState::Stopping
        )
    }
}

/// Errors raised by actor handlers.
///
/// Carried inside `FAILED` signals, so the payload is kept clonable; a
/// domain error is captured through its rendered message.
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum ActorError {
    #[error(transparent)]
    #[diagnostic(code(weft::actors::bad_actor))]
    BadActor(#[from] BadActorError),

    #[error("{message}")]
    #[diagnostic(code(weft::actors::failure))]
    Failure { message: String },
}

impl ActorError {
    /// Capture any displayable error as an actor failure.
    #[must_use]
    pub fn failure(error: impl std::fmt::Display) -> Self {
        ActorError::Failure {
            message: error.to_string(),
        }
    }
}

/// An isolated unit of sequential execution.
///
/// Actors never share state; every interaction is a message or a signal,
/// processed strictly in arrival order on the actor's event loop. Handlers
/// return now and continue later via further messages; they never block
/// waiting for another actor.
#[async_trait]
pub trait Actor: Send + 'static {
    /// The handler table registered for this actor type at spawn time.
    /// Sends are validated against it before being queued.
    fn interface(&self) -> ActorInterface;

    async fn on_start(&mut self, _ctx: &mut ActorContext) -> Result<(), ActorError> {
        Ok(())
    }

    async fn on_stop(&mut self, _ctx: &mut ActorContext) -> Result<(), ActorError> {
        Ok(())
    }

    /// Handle one message previously validated against [`Self::interface`].
    async fn on_message(&mut self, ctx: &mut ActorContext, msg: Message) -> Result<(), ActorError>;

    /// Handle a `FAILED` signal from a direct child.
    ///
    /// Return `Ok(true)` to mark the failure handled; `Ok(false)` lets it
    /// propagate, which fails this actor too and re-emits the failure to
    /// its own parent.
    async fn on_child_failed(
        &mut self,
        _ctx: &mut ActorContext,
        _origin: &ActorPath,
        _error: &ActorError,
    ) -> Result<bool, ActorError> {
        Ok(false)
    }
}

/// Handler-scoped view of the runtime.
///
/// Lets a handler spawn children, send messages, request stops and record
/// a failure for the current handling context. Everything here is a queue
/// operation; nothing waits for another actor.
pub struct ActorContext {
    system: SystemHandle,
    path: ActorPath,
    parent: Option<ActorPath>,
    sender: Option<ActorPath>,
    pub(crate) spawned: Vec<ActorPath>,
    pub(crate) failure: Option<ActorError>,
}

impl ActorContext {
    pub(crate) fn new(
        system: SystemHandle,
        path: ActorPath,
        parent: Option<ActorPath>,
        sender: Option<ActorPath>,
    ) -> Self {
        Self {
            system,
            path,
            parent,
            sender,
            spawned: Vec::new(),
            failure: None,
        }
    }

    /// This actor's own address.
    #[must_use]
    pub fn path(&self) -> &ActorPath {
        &self.path
    }

    #[must_use]
    pub fn parent(&self) -> Option<&ActorPath> {
        self.parent.as_ref()
    }

    /// Sender of the message currently being handled, if any.
    #[must_use]
    pub fn sender(&self) -> Option<&ActorPath> {
        self.sender.as_ref()
    }

    /// Handle to the surrounding system, for hooks that outlive the
    /// current handler invocation.
    #[must_use]
    pub fn system(&self) -> SystemHandle {
        self.system.clone()
    }

    /// Spawn a child actor on the named event-loop pool.
    pub fn spawn(
        &mut self,
        name: &str,
        actor: impl Actor,
        pool: &str,
    ) -> Result<ActorPath, BadActorError> {
        let path = self
            .system
            .spawn(Some(self.path.clone()), name, Box::new(actor), pool)?;
        self.spawned.push(path.clone());
        Ok(path)
    }

    /// Send a message with positional arguments only.
    pub fn send(
        &self,
        target: &ActorPath,
        name: &str,
        args: Vec<MessageArg>,
    ) -> Result<(), BadActorError> {
        self.system
            .send(&self.path, target, name, args, FxHashMap::default())
    }

    /// Send a message with positional and keyword arguments.
    pub fn send_with(
        &self,
        target: &ActorPath,
        name: &str,
        args: Vec<MessageArg>,
        kwargs: FxHashMap<String, MessageArg>,
    ) -> Result<(), BadActorError> {
        self.system.send(&self.path, target, name, args, kwargs)
    }

    /// Request a stop of `target`; legal only for the actor itself, its
    /// parent, or the system.
    pub fn stop(&self, target: &ActorPath) -> Result<(), BadActorError> {
        self.system.stop(&self.path, target)
    }

    /// Queue a stop of this actor itself.
    pub fn stop_self(&self) {
        // Stopping self is always legal; an error here means the system is
        // already tearing down.
        if let Err(error) = self.system.stop(&self.path, &self.path) {
            tracing::debug!(actor = %self.path, %error, "self-stop after system teardown");
        }
    }

    /// Record an error for the current handling context. After the handler
    /// returns the runtime moves the actor to `Error` and begins teardown.
    pub fn fail(&mut self, error: ActorError) {
        if self.failure.is_none() {
            self.failure = Some(error);
        }
    }
}
