//! # Control Messages
//!
//! The closed vocabulary every node of a cluster speaks. Adding a variant is a
//! protocol change that all nodes must pick up together.
//!
//! | Variant       | Routed by ring | Reply                      |
//! |---------------|----------------|----------------------------|
//! | `Start`       | yes            | none                       |
//! | `GridDeliver` | yes            | `Answer` if correlated     |
//! | `Answer`      | no             | none                       |
//! | `Relocate`    | yes            | `Answer` if correlated     |
//! | `Forward`     | inner message  | whatever the inner expects |

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use grid_api::address::Address;
use grid_api::errors::FailureReason;
use grid_api::types::{BoxedFuture, GridResult, NodeId, Payload, UnitOfWork};

use crate::protocol::visitor::MessageVisitor;

pub type CorrelationId = Uuid;

/// Asks the owner to materialize an actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Start {
    pub protocol: String,
    pub address: Address,
    pub params: Payload,
}

/// Delivers one unit of work to the owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridDeliver {
    pub protocol: String,
    pub address: Address,
    pub params: Payload,
    pub work: UnitOfWork,
    pub correlation_id: Option<CorrelationId>,
}

impl GridDeliver {
    pub fn operation(&self) -> &str {
        &self.work.operation
    }
}

/// Result of a correlated request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub correlation_id: CorrelationId,
    pub outcome: Result<Payload, FailureReason>,
}

/// Moves an actor's state and pending work to its new owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relocate {
    pub protocol: String,
    pub address: Address,
    pub params: Payload,
    pub snapshot: Payload,
    /// In the order the old owner received them.
    pub pending: Vec<GridDeliver>,
    pub correlation_id: Option<CorrelationId>,
}

/// A message re-sent by a node that was not its owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forward {
    pub original_sender: NodeId,
    pub message: Box<ControlMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlMessage {
    Start(Start),
    GridDeliver(GridDeliver),
    Answer(Answer),
    Relocate(Relocate),
    Forward(Forward),
}

impl ControlMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::Start(_) => "start",
            ControlMessage::GridDeliver(_) => "grid_deliver",
            ControlMessage::Answer(_) => "answer",
            ControlMessage::Relocate(_) => "relocate",
            ControlMessage::Forward(_) => "forward",
        }
    }

    /// The address the ring routes this message by. `Answer` has none.
    pub fn address(&self) -> Option<&Address> {
        match self {
            ControlMessage::Start(start) => Some(&start.address),
            ControlMessage::GridDeliver(deliver) => Some(&deliver.address),
            ControlMessage::Relocate(relocate) => Some(&relocate.address),
            ControlMessage::Answer(_) => None,
            ControlMessage::Forward(forward) => forward.message.address(),
        }
    }

    /// Wraps this message for a one-hop relay that keeps the original sender.
    pub fn forwarded_from(self, original_sender: NodeId) -> ControlMessage {
        match self {
            // a relay of a relay still answers the first sender
            ControlMessage::Forward(forward) => ControlMessage::Forward(forward),
            other => ControlMessage::Forward(Forward {
                original_sender,
                message: Box::new(other),
            }),
        }
    }

    /// Presents the message to `visitor`.
    ///
    /// `receiver` is the local node, `sender` the node the frame came from.
    pub fn accept<'a, V>(
        self,
        receiver: NodeId,
        sender: NodeId,
        visitor: &'a V,
    ) -> BoxedFuture<'a, GridResult<()>>
    where
        V: MessageVisitor + ?Sized,
    {
        Box::pin(async move {
            match self {
                ControlMessage::Start(start) => visitor.visit_start(receiver, sender, start).await,
                ControlMessage::GridDeliver(deliver) => {
                    visitor.visit_deliver(receiver, sender, deliver).await
                }
                ControlMessage::Answer(answer) => visitor.visit_answer(receiver, sender, answer).await,
                ControlMessage::Relocate(relocate) => {
                    visitor.visit_relocate(receiver, sender, relocate).await
                }
                ControlMessage::Forward(forward) => {
                    visitor.visit_forward(receiver, sender, forward).await
                }
            }
        })
    }
}

impl From<Start> for ControlMessage {
    fn from(message: Start) -> Self {
        ControlMessage::Start(message)
    }
}

impl From<GridDeliver> for ControlMessage {
    fn from(message: GridDeliver) -> Self {
        ControlMessage::GridDeliver(message)
    }
}

impl From<Answer> for ControlMessage {
    fn from(message: Answer) -> Self {
        ControlMessage::Answer(message)
    }
}

impl From<Relocate> for ControlMessage {
    fn from(message: Relocate) -> Self {
        ControlMessage::Relocate(message)
    }
}

impl From<Forward> for ControlMessage {
    fn from(message: Forward) -> Self {
        ControlMessage::Forward(message)
    }
}
