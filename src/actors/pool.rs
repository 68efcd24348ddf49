//! Named pools of sequential event loops.
//!
//! Each loop is one task draining one queue, so every actor attached to a
//! loop sees its queue items in arrival order and two actors on the same
//! loop never run concurrently. Pools assign actors to loops round-robin
//! at spawn time; an actor stays on its loop for life.

use std::sync::Weak;
use std::sync::atomic::{AtomicUsize, Ordering};

use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::address::ActorPath;
use super::cell::ActorCell;
use super::message::{Message, Signal};
use super::system::{SystemCore, SystemHandle};

/// Sizing for one named pool.
#[derive(Clone, Debug)]
pub struct PoolSpec {
    pub name: String,
    pub loops: usize,
}

impl PoolSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, loops: usize) -> Self {
        Self {
            name: name.into(),
            loops: loops.max(1),
        }
    }
}

/// One queue item addressed to an actor.
pub(crate) enum Delivery {
    Signal {
        from: Option<ActorPath>,
        signal: Signal,
    },
    Message(Message),
}

pub(crate) enum LoopCommand {
    /// Home a freshly spawned cell on this loop.
    Attach(ActorCell),
    Deliver {
        target: ActorPath,
        item: Delivery,
    },
    Shutdown(oneshot::Sender<()>),
}

pub(crate) struct Pool {
    name: String,
    loops: Vec<flume::Sender<LoopCommand>>,
    cursor: AtomicUsize,
}

impl Pool {
    /// Spawn the pool's loop tasks. Loops hold only a weak reference to the
    /// system so a dropped system can wind down without a reference cycle.
    pub(crate) fn start(spec: &PoolSpec, core: Weak<SystemCore>) -> Self {
        let mut loops = Vec::with_capacity(spec.loops);
        for index in 0..spec.loops {
            let (tx, rx) = flume::unbounded();
            let core = core.clone();
            let name = spec.name.clone();
            tokio::spawn(async move {
                run_loop(&name, index, core, rx).await;
            });
            loops.push(tx);
        }
        Self {
            name: spec.name.clone(),
            loops,
            cursor: AtomicUsize::new(0),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Pick the loop for a new actor.
    pub(crate) fn assign(&self) -> flume::Sender<LoopCommand> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.loops.len();
        self.loops[index].clone()
    }

    pub(crate) async fn shutdown(&self) {
        for tx in &self.loops {
            let (ack_tx, ack_rx) = oneshot::channel();
            if tx.send(LoopCommand::Shutdown(ack_tx)).is_ok() {
                let _ = ack_rx.await;
            }
        }
    }
}

async fn run_loop(
    pool: &str,
    index: usize,
    core: Weak<SystemCore>,
    rx: flume::Receiver<LoopCommand>,
) {
    let mut cells: FxHashMap<ActorPath, ActorCell> = FxHashMap::default();
    while let Ok(command) = rx.recv_async().await {
        match command {
            LoopCommand::Attach(cell) => {
                cells.insert(cell.path().clone(), cell);
            }
            LoopCommand::Deliver { target, item } => {
                let Some(core) = core.upgrade() else {
                    break;
                };
                let system = SystemHandle::from_core(core);
                let Some(cell) = cells.get_mut(&target) else {
                    warn!(pool, loop_index = index, actor = %target, "delivery to unknown cell");
                    continue;
                };
                match item {
                    Delivery::Signal { from, signal } => {
                        cell.handle_signal(&system, from, signal).await;
                    }
                    Delivery::Message(msg) => {
                        cell.handle_message(&system, msg).await;
                    }
                }
                if cell.is_terminated() {
                    cells.remove(&target);
                }
            }
            LoopCommand::Shutdown(ack) => {
                let _ = ack.send(());
                break;
            }
        }
    }
    debug!(pool, loop_index = index, "event loop finished");
}
