//! Minimal actor runtime backing the execution engine.
//!
//! Actors are isolated sequential units addressed by hierarchical
//! [`ActorPath`]s. All interaction is message passing: a send is validated
//! against the target type's declared [`ActorInterface`] synchronously at
//! the caller, then queued on the target's event loop and handled strictly
//! in arrival order. Lifecycle is driven by [`Signal`]s; stops cascade down
//! the supervision tree and complete bottom-up, failures travel up unless a
//! parent claims them.

pub mod actor;
pub mod address;
pub mod interface;
pub mod message;
pub mod pool;
pub mod system;

mod cell;

pub use actor::{Actor, ActorContext, ActorError, ActorState};
pub use address::ActorPath;
pub use interface::{ActorInterface, BadActorError, HandlerSpec, ParamSpec};
pub use message::{ArgKind, Message, MessageArg, Signal};
pub use pool::PoolSpec;
pub use system::{ActorSystem, DEFAULT_POOL, SystemHandle};
