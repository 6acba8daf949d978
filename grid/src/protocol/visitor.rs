use async_trait::async_trait;

use grid_api::types::{GridResult, NodeId};

use crate::protocol::message::{Answer, Forward, GridDeliver, Relocate, Start};

/// Per-variant handling of control messages.
///
/// `receiver` is always the local node. `sender` is the node the message
/// originated from; for a forwarded message it is the original sender, not
/// the relay.
#[async_trait]
pub trait MessageVisitor: Send + Sync {
    async fn visit_start(&self, receiver: NodeId, sender: NodeId, message: Start) -> GridResult<()>;

    async fn visit_deliver(
        &self,
        receiver: NodeId,
        sender: NodeId,
        message: GridDeliver,
    ) -> GridResult<()>;

    async fn visit_answer(&self, receiver: NodeId, sender: NodeId, message: Answer)
        -> GridResult<()>;

    async fn visit_relocate(
        &self,
        receiver: NodeId,
        sender: NodeId,
        message: Relocate,
    ) -> GridResult<()>;

    /// Unwraps and re-dispatches with the original sender substituted.
    async fn visit_forward(
        &self,
        receiver: NodeId,
        _sender: NodeId,
        message: Forward,
    ) -> GridResult<()> {
        let Forward {
            original_sender,
            message,
        } = message;
        (*message).accept(receiver, original_sender, self).await
    }
}
