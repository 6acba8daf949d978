use std::fmt;

use async_trait::async_trait;

use grid_api::types::{GridResult, UnitOfWork};

use crate::correlation::ReplySender;

pub mod local;
pub mod ring_aware;

pub use local::{LocalMailbox, QueueState};
pub use ring_aware::{Restore, RingAwareMailbox};

/// One queued unit of work and, for an ask, where its result goes.
pub struct Envelope {
    pub work: UnitOfWork,
    pub reply: Option<ReplySender>,
}

impl Envelope {
    pub fn tell(work: UnitOfWork) -> Self {
        Self { work, reply: None }
    }

    pub fn ask(work: UnitOfWork, reply: ReplySender) -> Self {
        Self {
            work,
            reply: Some(reply),
        }
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("operation", &self.work.operation)
            .field("reply", &self.reply.as_ref().map(|_| "<reply-channel>"))
            .finish()
    }
}

/// Abstract interface for an actor's message queue.
/// Implementors must guarantee FIFO ordering.
#[async_trait]
pub trait Mailbox: Send + Sync + fmt::Debug {
    /// Queues or routes one envelope.
    async fn send(&self, envelope: Envelope) -> GridResult<()>;

    /// Next envelope for the local activation. `None` once closed, or when
    /// the authoritative queue lives on another node.
    async fn receive(&self) -> Option<Envelope>;

    async fn close(&self);

    async fn is_closed(&self) -> bool;

    /// Envelopes waiting locally.
    async fn pending_count(&self) -> usize;

    /// Parks the local activation. Returns `false` if already suspended or closed.
    fn suspend(&self) -> bool;

    /// Returns `false` if the queue was not suspended.
    fn resume(&self) -> bool;

    fn is_suspended(&self) -> bool;

    /// Removes every waiting envelope, oldest first.
    fn drain_pending(&self) -> Vec<Envelope>;

    /// Address id this mailbox belongs to.
    fn path(&self) -> &str;
}
