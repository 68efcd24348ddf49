//! Short-lived actor running exactly one node.
//!
//! Spawned by the graph processor for a viable node, runs the resolved
//! function against a pinned snapshot, checks the result against the
//! node's declared type, reports exactly one completion message back, and
//! stops itself. A domain failure is an ordinary `node_failed` report, not
//! an actor failure; the graph owns error aggregation.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::actors::{Actor, ActorContext, ActorError, ActorInterface, Message, MessageArg};
use crate::errors::EngineError;
use crate::graph::NodeId;

use super::functions::{ExecContext, NodeFunction};
use super::processor::{self, NodeFailure, NodeOutcome};

pub(crate) struct NodeProcessor {
    node_id: NodeId,
    function: Arc<dyn NodeFunction>,
    exec: ExecContext,
}

impl NodeProcessor {
    pub(crate) fn new(node_id: NodeId, function: Arc<dyn NodeFunction>, exec: ExecContext) -> Self {
        Self {
            node_id,
            function,
            exec,
        }
    }

    async fn execute(&self) -> Result<NodeOutcome, EngineError> {
        let outcome = self.function.run(&self.exec).await?;
        if !self.node_id.result_type().conforms(&outcome.value) {
            return Err(EngineError::ResultTypeMismatch {
                id: self.node_id.to_string(),
                expected: self.node_id.result_type().to_string(),
            });
        }
        Ok(NodeOutcome {
            id: self.node_id.clone(),
            value: outcome.value,
            update: outcome.update,
        })
    }
}

#[async_trait]
impl Actor for NodeProcessor {
    fn interface(&self) -> ActorInterface {
        // Fire-and-forget: everything arrives at construction, nothing by
        // message.
        ActorInterface::new("NodeProcessor", Vec::new())
    }

    #[instrument(skip_all, fields(node = %self.node_id))]
    async fn on_start(&mut self, ctx: &mut ActorContext) -> Result<(), ActorError> {
        let parent = ctx
            .parent()
            .cloned()
            .ok_or_else(|| ActorError::failure("node processor spawned without a parent"))?;
        match self.execute().await {
            Ok(outcome) => {
                debug!("node succeeded");
                ctx.send(
                    &parent,
                    processor::NODE_SUCCEEDED,
                    vec![MessageArg::payload(outcome)],
                )?;
            }
            Err(error) => {
                debug!(%error, "node failed");
                ctx.send(
                    &parent,
                    processor::NODE_FAILED,
                    vec![MessageArg::payload(NodeFailure {
                        id: self.node_id.clone(),
                        error,
                    })],
                )?;
            }
        }
        ctx.stop_self();
        Ok(())
    }

    async fn on_message(&mut self, _ctx: &mut ActorContext, msg: Message) -> Result<(), ActorError> {
        // Unreachable: the declared interface admits no messages.
        Err(ActorError::failure(format!(
            "unexpected message '{}' to a node processor",
            msg.name
        )))
    }
}
