//! Per-actor-type handler registries and send-time validation.
//!
//! Every actor type declares an [`ActorInterface`]: an explicit table
//! mapping message names to parameter schemas. The system validates every
//! send against the target's registered table and raises a
//! [`BadActorError`] synchronously at the sender when the call is
//! structurally invalid; nothing malformed is ever queued.

use miette::Diagnostic;
use thiserror::Error;

use super::message::{ArgKind, Message};

/// Schema of one declared parameter.
#[derive(Clone, Debug)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ArgKind,
    pub optional: bool,
}

impl ParamSpec {
    #[must_use]
    pub fn required(name: &'static str, kind: ArgKind) -> Self {
        Self {
            name,
            kind,
            optional: false,
        }
    }

    #[must_use]
    pub fn optional(name: &'static str, kind: ArgKind) -> Self {
        Self {
            name,
            kind,
            optional: true,
        }
    }

    /// Required opaque payload of type `T`.
    #[must_use]
    pub fn payload<T: 'static>(name: &'static str) -> Self {
        Self::required(name, ArgKind::Payload(std::any::type_name::<T>()))
    }

    /// Optional opaque payload of type `T`.
    #[must_use]
    pub fn payload_opt<T: 'static>(name: &'static str) -> Self {
        Self::optional(name, ArgKind::Payload(std::any::type_name::<T>()))
    }
}

/// Schema of one message handler.
#[derive(Clone, Debug)]
pub struct HandlerSpec {
    pub name: &'static str,
    pub params: Vec<ParamSpec>,
}

impl HandlerSpec {
    #[must_use]
    pub fn new(name: &'static str, params: Vec<ParamSpec>) -> Self {
        Self { name, params }
    }
}

/// Handler table registered for an actor type at spawn time.
#[derive(Clone, Debug)]
pub struct ActorInterface {
    pub type_name: &'static str,
    pub handlers: Vec<HandlerSpec>,
}

impl ActorInterface {
    #[must_use]
    pub fn new(type_name: &'static str, handlers: Vec<HandlerSpec>) -> Self {
        Self {
            type_name,
            handlers,
        }
    }

    #[must_use]
    pub fn handler(&self, name: &str) -> Option<&HandlerSpec> {
        self.handlers.iter().find(|spec| spec.name == name)
    }

    /// Validate a message against this table: handler must exist, positional
    /// count and kinds must match, keyword names must name unbound declared
    /// parameters, and every required parameter must end up bound.
    pub fn validate(&self, message: &Message) -> Result<(), BadActorError> {
        let Some(handler) = self.handler(&message.name) else {
            return Err(BadActorError::UnknownMessage {
                actor: self.type_name.to_string(),
                message: message.name.clone(),
            });
        };

        if message.args.len() > handler.params.len() {
            return Err(self.mismatch(
                &message.name,
                format!(
                    "too many positional arguments: {} declared, {} given",
                    handler.params.len(),
                    message.args.len()
                ),
            ));
        }

        let mut bound = vec![false; handler.params.len()];
        for (index, arg) in message.args.iter().enumerate() {
            let param = &handler.params[index];
            if arg.kind() != param.kind {
                return Err(self.mismatch(
                    &message.name,
                    format!(
                        "argument '{}' expects {}, got {}",
                        param.name,
                        param.kind,
                        arg.kind()
                    ),
                ));
            }
            bound[index] = true;
        }

        for (name, arg) in &message.kwargs {
            let Some(index) = handler.params.iter().position(|p| p.name == name) else {
                return Err(self.mismatch(
                    &message.name,
                    format!("unknown keyword argument '{name}'"),
                ));
            };
            if bound[index] {
                return Err(self.mismatch(
                    &message.name,
                    format!("argument '{name}' bound both positionally and by keyword"),
                ));
            }
            let param = &handler.params[index];
            if arg.kind() != param.kind {
                return Err(self.mismatch(
                    &message.name,
                    format!(
                        "argument '{}' expects {}, got {}",
                        param.name,
                        param.kind,
                        arg.kind()
                    ),
                ));
            }
            bound[index] = true;
        }

        for (index, param) in handler.params.iter().enumerate() {
            if !bound[index] && !param.optional {
                return Err(self.mismatch(
                    &message.name,
                    format!("missing required argument '{}'", param.name),
                ));
            }
        }

        Ok(())
    }

    fn mismatch(&self, message: &str, detail: String) -> BadActorError {
        BadActorError::ArgumentMismatch {
            actor: self.type_name.to_string(),
            message: message.to_string(),
            detail,
        }
    }
}

/// A structurally invalid message or signal send, raised synchronously to
/// the caller. A well-formed send to an actor that has already gone away is
/// *not* a bad-actor error; those messages are dropped with a warning.
#[derive(Debug, Clone, Error, Diagnostic, PartialEq, Eq)]
pub enum BadActorError {
    #[error("actor type {actor} declares no handler '{message}'")]
    #[diagnostic(code(weft::actors::unknown_message))]
    UnknownMessage { actor: String, message: String },

    #[error("invalid call to {actor}.{message}: {detail}")]
    #[diagnostic(
        code(weft::actors::argument_mismatch),
        help("Compare the send against the actor type's declared handler table.")
    )]
    ArgumentMismatch {
        actor: String,
        message: String,
        detail: String,
    },

    #[error("{caller} may not stop {target}: only the actor, its parent or the system may")]
    #[diagnostic(code(weft::actors::illegal_stop))]
    IllegalStop { caller: String, target: String },

    #[error("no event-loop pool named '{pool}'")]
    #[diagnostic(code(weft::actors::unknown_pool))]
    UnknownPool { pool: String },

    #[error("actor address {path} is already in use")]
    #[diagnostic(code(weft::actors::duplicate_actor))]
    DuplicateActor { path: String },

    #[error("actor system is shut down")]
    #[diagnostic(code(weft::actors::system_down))]
    SystemDown,
}
