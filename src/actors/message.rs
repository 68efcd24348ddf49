//! Messages, arguments and lifecycle signals.
//!
//! A [`Message`] is immutable once constructed: sender, target, handler
//! name, positional arguments and keyword arguments. Arguments are a closed
//! payload enum so that sends can be validated structurally against the
//! target's declared handler table before anything is queued.
//!
//! A [`Signal`] is the reserved lifecycle subtype; only the runtime itself
//! (or a parent, or the actor's own context) ever produces one.

use std::any::{self, Any};
use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;

use super::actor::ActorError;
use super::address::ActorPath;

/// Structural kind of a message argument, used for send-time validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgKind {
    /// A JSON value.
    Json,
    /// An actor address.
    Path,
    /// An opaque in-process payload of the named Rust type.
    Payload(&'static str),
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgKind::Json => write!(f, "json"),
            ArgKind::Path => write!(f, "path"),
            ArgKind::Payload(type_name) => write!(f, "payload<{type_name}>"),
        }
    }
}

/// One argument of a message.
#[derive(Clone)]
pub enum MessageArg {
    Json(Value),
    Path(ActorPath),
    Payload {
        type_name: &'static str,
        value: Arc<dyn Any + Send + Sync>,
    },
}

impl MessageArg {
    #[must_use]
    pub fn json(value: impl Into<Value>) -> Self {
        MessageArg::Json(value.into())
    }

    #[must_use]
    pub fn path(path: ActorPath) -> Self {
        MessageArg::Path(path)
    }

    /// Wrap an in-process payload; the payload's type name becomes part of
    /// the argument's structural kind.
    #[must_use]
    pub fn payload<T: Any + Send + Sync>(value: T) -> Self {
        MessageArg::Payload {
            type_name: any::type_name::<T>(),
            value: Arc::new(value),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ArgKind {
        match self {
            MessageArg::Json(_) => ArgKind::Json,
            MessageArg::Path(_) => ArgKind::Path,
            MessageArg::Payload { type_name, .. } => ArgKind::Payload(type_name),
        }
    }

    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            MessageArg::Json(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.as_json().and_then(Value::as_str)
    }

    #[must_use]
    pub fn as_path(&self) -> Option<&ActorPath> {
        match self {
            MessageArg::Path(path) => Some(path),
            _ => None,
        }
    }

    /// Downcast an opaque payload to its concrete type.
    #[must_use]
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            MessageArg::Payload { value, .. } => Arc::clone(value).downcast::<T>().ok(),
            _ => None,
        }
    }
}

impl fmt::Debug for MessageArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageArg::Json(value) => f.debug_tuple("Json").field(value).finish(),
            MessageArg::Path(path) => f.debug_tuple("Path").field(path).finish(),
            MessageArg::Payload { type_name, .. } => {
                f.debug_tuple("Payload").field(type_name).finish()
            }
        }
    }
}

/// An immutable message, constructed at send time.
#[derive(Clone, Debug)]
pub struct Message {
    pub sender: ActorPath,
    pub target: ActorPath,
    pub name: String,
    pub args: Vec<MessageArg>,
    pub kwargs: FxHashMap<String, MessageArg>,
}

impl Message {
    #[must_use]
    pub fn new(
        sender: ActorPath,
        target: ActorPath,
        name: impl Into<String>,
        args: Vec<MessageArg>,
        kwargs: FxHashMap<String, MessageArg>,
    ) -> Self {
        Self {
            sender,
            target,
            name: name.into(),
            args,
            kwargs,
        }
    }

    /// Positional argument by index.
    #[must_use]
    pub fn arg(&self, index: usize) -> Option<&MessageArg> {
        self.args.get(index)
    }

    /// Keyword argument by name.
    #[must_use]
    pub fn kwarg(&self, name: &str) -> Option<&MessageArg> {
        self.kwargs.get(name)
    }
}

/// Reserved lifecycle control messages.
#[derive(Clone, Debug)]
pub enum Signal {
    Start,
    Stop,
    Started,
    Stopped,
    /// A failure notification carrying the cause and the address where the
    /// failure originated.
    Failed {
        origin: ActorPath,
        error: ActorError,
    },
}

impl Signal {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Signal::Start => "START",
            Signal::Stop => "STOP",
            Signal::Started => "STARTED",
            Signal::Stopped => "STOPPED",
            Signal::Failed { .. } => "FAILED",
        }
    }
}
