//! The actor system: registry, routing and spawning.
//!
//! The system owns the event-loop pools and a registry mapping live actor
//! addresses to their home loop and declared handler table. Sends are
//! validated here, synchronously at the caller, then queued on the target's
//! loop. A well-formed send to an address that has already gone away is
//! dropped with a warning; only structural errors surface to the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use rustc_hash::FxHashMap;
use tokio::sync::Notify;
use tracing::{error, warn};

use super::actor::{Actor, ActorError};
use super::address::ActorPath;
use super::cell::ActorCell;
use super::interface::{ActorInterface, BadActorError};
use super::message::{Message, MessageArg, Signal};
use super::pool::{Delivery, LoopCommand, Pool, PoolSpec};

/// Pool used when a spawn does not name one.
pub const DEFAULT_POOL: &str = "default";

struct ActorEntry {
    loop_tx: flume::Sender<LoopCommand>,
    interface: ActorInterface,
}

pub(crate) struct SystemCore {
    registry: Mutex<FxHashMap<ActorPath, ActorEntry>>,
    pools: FxHashMap<String, Pool>,
    fatal: Mutex<Option<(ActorPath, ActorError)>>,
    idle: Notify,
    down: AtomicBool,
}

fn relock<'a, T>(
    guard: Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>,
) -> MutexGuard<'a, T> {
    guard.unwrap_or_else(PoisonError::into_inner)
}

/// Cheap clonable handle onto a running system.
#[derive(Clone)]
pub struct SystemHandle {
    core: Arc<SystemCore>,
}

impl SystemHandle {
    pub(crate) fn from_core(core: Arc<SystemCore>) -> Self {
        Self { core }
    }

    /// Register and start an actor. The address is the parent's address
    /// extended by `name` (or a root address when there is no parent); the
    /// `Start` signal is queued before anything else can reach the actor.
    pub(crate) fn spawn(
        &self,
        parent: Option<ActorPath>,
        name: &str,
        actor: Box<dyn Actor>,
        pool: &str,
    ) -> Result<ActorPath, BadActorError> {
        if self.core.down.load(Ordering::Acquire) {
            return Err(BadActorError::SystemDown);
        }
        let path = match &parent {
            Some(parent) => parent.child(name),
            None => ActorPath::root().child(name),
        };
        let Some(pool) = self.core.pools.get(pool) else {
            return Err(BadActorError::UnknownPool {
                pool: pool.to_string(),
            });
        };
        let interface = actor.interface();
        let cell = ActorCell::new(path.clone(), parent, actor);

        let loop_tx = {
            let mut registry = relock(self.core.registry.lock());
            if registry.contains_key(&path) {
                return Err(BadActorError::DuplicateActor {
                    path: path.to_string(),
                });
            }
            let loop_tx = pool.assign();
            registry.insert(
                path.clone(),
                ActorEntry {
                    loop_tx: loop_tx.clone(),
                    interface,
                },
            );
            loop_tx
        };

        if loop_tx.send(LoopCommand::Attach(cell)).is_err() {
            relock(self.core.registry.lock()).remove(&path);
            return Err(BadActorError::SystemDown);
        }
        self.send_signal(None, &path, Signal::Start);
        Ok(path)
    }

    /// Validate and queue a message. Unknown targets are not an error for
    /// the sender; the message is dropped with a warning.
    pub(crate) fn send(
        &self,
        sender: &ActorPath,
        target: &ActorPath,
        name: &str,
        args: Vec<MessageArg>,
        kwargs: FxHashMap<String, MessageArg>,
    ) -> Result<(), BadActorError> {
        if self.core.down.load(Ordering::Acquire) {
            return Err(BadActorError::SystemDown);
        }
        let message = Message::new(sender.clone(), target.clone(), name, args, kwargs);
        let loop_tx = {
            let registry = relock(self.core.registry.lock());
            let Some(entry) = registry.get(target) else {
                warn!(%target, message = name, "dropping message to unknown actor");
                return Ok(());
            };
            entry.interface.validate(&message)?;
            entry.loop_tx.clone()
        };
        if loop_tx
            .send(LoopCommand::Deliver {
                target: target.clone(),
                item: Delivery::Message(message),
            })
            .is_err()
        {
            warn!(%target, message = name, "dropping message to closed event loop");
        }
        Ok(())
    }

    /// Queue a lifecycle signal; unknown targets are dropped quietly since
    /// signals routinely race actor termination.
    pub(crate) fn send_signal(&self, from: Option<ActorPath>, target: &ActorPath, signal: Signal) {
        let loop_tx = {
            let registry = relock(self.core.registry.lock());
            match registry.get(target) {
                Some(entry) => entry.loop_tx.clone(),
                None => {
                    warn!(%target, signal = signal.name(), "dropping signal to unknown actor");
                    return;
                }
            }
        };
        if loop_tx
            .send(LoopCommand::Deliver {
                target: target.clone(),
                item: Delivery::Signal { from, signal },
            })
            .is_err()
        {
            warn!(%target, "dropping signal to closed event loop");
        }
    }

    /// Queue a stop of `target`. Only the actor itself, its direct parent
    /// or the system (the root caller) holds that right.
    pub(crate) fn stop(&self, caller: &ActorPath, target: &ActorPath) -> Result<(), BadActorError> {
        let permitted = caller.is_root()
            || caller == target
            || target.parent().as_ref() == Some(caller);
        if !permitted {
            return Err(BadActorError::IllegalStop {
                caller: caller.to_string(),
                target: target.to_string(),
            });
        }
        self.send_signal(Some(caller.clone()), target, Signal::Stop);
        Ok(())
    }

    /// `true` while the addressed actor is live. Addresses outlive their
    /// actors, so this is inherently racy and fit for tests and diagnostics
    /// only.
    #[must_use]
    pub fn is_registered(&self, path: &ActorPath) -> bool {
        relock(self.core.registry.lock()).contains_key(path)
    }

    pub(crate) fn unregister(&self, path: &ActorPath) {
        let empty = {
            let mut registry = relock(self.core.registry.lock());
            registry.remove(path);
            registry.is_empty()
        };
        if empty {
            self.core.idle.notify_waiters();
        }
    }

    /// Record a failure that reached a root actor unhandled. The first
    /// fatal cause sticks.
    pub(crate) fn report_fatal(&self, origin: ActorPath, cause: ActorError) {
        error!(%origin, %cause, "unhandled failure reached root actor");
        let mut fatal = relock(self.core.fatal.lock());
        if fatal.is_none() {
            *fatal = Some((origin, cause));
        }
    }
}

/// A running actor system.
///
/// # Examples
///
/// ```no_run
/// use weft::actors::{ActorSystem, PoolSpec};
///
/// # async fn demo() {
/// let system = ActorSystem::new(vec![PoolSpec::new("workers", 4)]);
/// # let _ = system;
/// # }
/// ```
pub struct ActorSystem {
    core: Arc<SystemCore>,
}

impl ActorSystem {
    /// Start a system with the given pools plus a `default` pool of one
    /// loop when none of the specs claims that name.
    #[must_use]
    pub fn new(pools: Vec<PoolSpec>) -> Self {
        let mut specs = pools;
        if !specs.iter().any(|spec| spec.name == DEFAULT_POOL) {
            specs.push(PoolSpec::new(DEFAULT_POOL, 1));
        }
        let core = Arc::new_cyclic(|weak: &Weak<SystemCore>| {
            let mut pools = FxHashMap::default();
            for spec in &specs {
                pools.insert(spec.name.clone(), Pool::start(spec, weak.clone()));
            }
            SystemCore {
                registry: Mutex::new(FxHashMap::default()),
                pools,
                fatal: Mutex::new(None),
                idle: Notify::new(),
                down: AtomicBool::new(false),
            }
        });
        Self { core }
    }

    #[must_use]
    pub fn handle(&self) -> SystemHandle {
        SystemHandle::from_core(Arc::clone(&self.core))
    }

    /// Spawn a top-level actor with no parent.
    pub fn spawn_root(
        &self,
        name: &str,
        actor: impl Actor,
        pool: &str,
    ) -> Result<ActorPath, BadActorError> {
        self.handle().spawn(None, name, Box::new(actor), pool)
    }

    /// Send a message on behalf of the system itself.
    pub fn send(
        &self,
        target: &ActorPath,
        name: &str,
        args: Vec<MessageArg>,
        kwargs: FxHashMap<String, MessageArg>,
    ) -> Result<(), BadActorError> {
        self.handle()
            .send(&ActorPath::root(), target, name, args, kwargs)
    }

    /// Request a stop of any actor; the system holds that right for all.
    pub fn stop(&self, target: &ActorPath) -> Result<(), BadActorError> {
        self.handle().stop(&ActorPath::root(), target)
    }

    /// First failure that reached a root actor unhandled, if any.
    #[must_use]
    pub fn fatal_error(&self) -> Option<(ActorPath, ActorError)> {
        relock(self.core.fatal.lock()).clone()
    }

    /// Wait until every registered actor has terminated.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.core.idle.notified();
            if relock(self.core.registry.lock()).is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Stop all root actors, wait for the tree to drain, then wind down
    /// the event loops. Further spawns and sends fail with
    /// [`BadActorError::SystemDown`].
    pub async fn shutdown(&self) {
        self.core.down.store(true, Ordering::Release);
        let roots: Vec<ActorPath> = {
            let registry = relock(self.core.registry.lock());
            registry.keys().filter(|p| p.depth() == 1).cloned().collect()
        };
        let handle = self.handle();
        for root in roots {
            handle.send_signal(Some(ActorPath::root()), &root, Signal::Stop);
        }
        self.wait_idle().await;
        for pool in self.core.pools.values() {
            pool.shutdown().await;
        }
    }
}
