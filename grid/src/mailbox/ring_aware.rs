//! # Ring-Aware Mailbox
//!
//! The mailbox every distributable address gets. It wraps the address's
//! local queue and a [`Residency`] chosen from a ring lookup at creation:
//!
//! ```text
//!   Local ──relocate_to()──▶ Relocating ──Relocate handed off──▶ Remote
//!     ▲                                                           │
//!     └──────── Relocate received / ring names this node again ───┘
//! ```
//!
//! - `Local` and `Relocating` sends go to the local queue. While relocating
//!   the queue is suspended, so those envelopes travel with the `Relocate`.
//! - `Remote` sends re-check the ring and go out as `GridDeliver`. If the
//!   ring now names this node, the mailbox localizes instead.
//!
//! Suspension always acts on the local queue whatever the residency.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock, RwLockWriteGuard};
use tokio::task::JoinHandle;

use grid_api::actor::{ActorSpec, Residency, SharedFactory};
use grid_api::address::Address;
use grid_api::errors::GridError;
use grid_api::types::{GridResult, NodeId, Payload};

use crate::correlation::ReplySender;
use crate::log_routing;
use crate::mailbox::{Envelope, LocalMailbox, Mailbox, QueueState};
use crate::outbound::{OutboundControl, OutgoingRelocation, RelocationFailure};
use crate::processor::Activation;
use crate::ring::SharedRing;

/// Progress of [`RingAwareMailbox::restore`].
#[derive(Debug)]
pub enum Restore {
    /// The snapshot is in place.
    Applied,
    /// The snapshot waits for the running handler of an existing activation.
    InProgress(JoinHandle<GridResult<()>>),
}

impl Restore {
    /// Resolves once the snapshot is in place.
    pub async fn finished(self) -> GridResult<()> {
        match self {
            Restore::Applied => Ok(()),
            Restore::InProgress(task) => task
                .await
                .map_err(|error| GridError::Unavailable(format!("restore task ended: {error}")))?,
        }
    }
}

pub struct RingAwareMailbox {
    spec: ActorSpec,
    local_node: NodeId,
    ring: SharedRing,
    outbound: Arc<OutboundControl>,
    factory: SharedFactory,
    queue: Arc<LocalMailbox>,
    residency: RwLock<Residency>,
    activation: Mutex<Option<Activation>>,
}

impl fmt::Debug for RingAwareMailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingAwareMailbox")
            .field("address", &self.spec.address)
            .field("protocol", &self.spec.protocol)
            .field("local_node", &self.local_node)
            .field("queue", &self.queue)
            .finish()
    }
}

impl RingAwareMailbox {
    /// Creates the mailbox. A `Local` residency constructs and starts the actor.
    pub fn new(
        spec: ActorSpec,
        local_node: NodeId,
        ring: SharedRing,
        outbound: Arc<OutboundControl>,
        factory: SharedFactory,
        capacity: Option<usize>,
        residency: Residency,
    ) -> GridResult<Self> {
        let queue = Arc::new(LocalMailbox::new(spec.address.id(), capacity));
        let residency = match residency {
            Residency::Relocating => Residency::Local,
            other => other,
        };
        let activation = if residency == Residency::Local {
            let actor = factory.create(&spec.address, &spec.params)?;
            Some(Activation::spawn(spec.address.clone(), actor, Arc::clone(&queue)))
        } else {
            // no activation here; the queue stays closed until localized
            let _ = queue.close_queue();
            None
        };
        Ok(Self {
            spec,
            local_node,
            ring,
            outbound,
            factory,
            queue,
            residency: RwLock::new(residency),
            activation: Mutex::new(activation),
        })
    }

    pub fn address(&self) -> &Address {
        &self.spec.address
    }

    pub fn spec(&self) -> &ActorSpec {
        &self.spec
    }

    pub fn queue(&self) -> &Arc<LocalMailbox> {
        &self.queue
    }

    pub async fn residency(&self) -> Residency {
        *self.residency.read().await
    }

    /// Owner of this address under the current ring.
    pub fn owner(&self) -> NodeId {
        if !self.spec.address.is_distributable() {
            return self.local_node;
        }
        self.ring
            .node_of(self.spec.address.id())
            .unwrap_or(self.local_node)
    }

    fn push_local(&self, envelope: Envelope) -> GridResult<()> {
        self.queue
            .push(envelope)
            .map_err(|error| error.into_grid_error(self.spec.address.id()))
    }

    /// Builds the actor and starts it on the local queue.
    ///
    /// `restore` is applied before the start hook runs; `pending` goes ahead
    /// of anything queued afterwards.
    async fn localize_locked(
        &self,
        residency: &mut RwLockWriteGuard<'_, Residency>,
        restore: Option<Payload>,
        pending: Vec<Envelope>,
    ) -> GridResult<()> {
        let mut actor = self.factory.create(&self.spec.address, &self.spec.params)?;
        if let Some(snapshot) = restore {
            actor.restore(snapshot).await?;
        }
        self.queue.reopen();
        self.queue
            .push_front_all(pending)
            .map_err(|error| error.into_grid_error(self.spec.address.id()))?;
        let activation = Activation::spawn(self.spec.address.clone(), actor, Arc::clone(&self.queue));
        *self.activation.lock().await = Some(activation);
        **residency = Residency::Local;
        Ok(())
    }

    /// Makes this node the address's host if it is not already.
    ///
    /// Returns `true` when an activation was created.
    pub async fn activate(&self) -> GridResult<bool> {
        let mut residency = self.residency.write().await;
        if *residency != Residency::Remote {
            return Ok(false);
        }
        self.localize_locked(&mut residency, None, Vec::new()).await?;
        log_routing!(self.spec.address, "localized");
        Ok(true)
    }

    /// Accepts state shipped by the previous owner.
    ///
    /// A fresh activation is restored before it starts, and the call returns
    /// [`Restore::Applied`]. An activation that already exists (traffic outran
    /// the relocation) is paused at once and `pending` is queued ahead of what
    /// it has; the snapshot is applied on a separate task once the in-flight
    /// handler finishes, so the caller never waits on a running handler.
    pub async fn restore(
        self: &Arc<Self>,
        snapshot: Payload,
        pending: Vec<Envelope>,
    ) -> GridResult<Restore> {
        let mut residency = self.residency.write().await;
        if *residency == Residency::Remote {
            self.localize_locked(&mut residency, Some(snapshot), pending).await?;
            return Ok(Restore::Applied);
        }

        let suspended_here = self.queue.suspend_queue();
        if let Err(error) = self.queue.push_front_all(pending) {
            if suspended_here {
                self.queue.resume_queue();
            }
            return Err(error.into_grid_error(self.spec.address.id()));
        }
        drop(residency);

        let mailbox = Arc::clone(self);
        let task = tokio::spawn(async move {
            mailbox.queue.wait_idle().await;
            let restored = match mailbox.activation.lock().await.as_ref() {
                Some(activation) => activation.restore(snapshot).await,
                None => Err(GridError::MailboxClosed(mailbox.spec.address.id().to_string())),
            };
            if suspended_here {
                mailbox.queue.resume_queue();
            }
            restored
        });
        Ok(Restore::InProgress(task))
    }

    /// Hands this address to `new_owner`.
    ///
    /// Suspends the queue, waits for the in-flight handler, snapshots the
    /// actor and ships the snapshot with every queued envelope. The write lock
    /// is held across the hand-off, so sends that race it route remotely only
    /// after the `Relocate` has been queued for transmission.
    ///
    /// The activation is dropped only once the `Relocate` is accepted. If the
    /// transport refuses it, the queued envelopes go back in front of the
    /// queue and the actor keeps running here.
    ///
    /// Returns `false` when there was nothing to move: not local, or already
    /// suspended.
    pub async fn relocate_to(
        &self,
        new_owner: NodeId,
        ack: Option<ReplySender>,
    ) -> GridResult<bool> {
        {
            let mut residency = self.residency.write().await;
            if *residency != Residency::Local || self.queue.state() != QueueState::Open {
                return Ok(false);
            }
            self.queue.suspend_queue();
            *residency = Residency::Relocating;
        }

        self.queue.wait_idle().await;
        let snapshot = {
            let activation = self.activation.lock().await;
            match activation.as_ref() {
                Some(activation) => activation.snapshot().await,
                None => Err(GridError::MailboxClosed(self.spec.address.id().to_string())),
            }
        };

        let mut residency = self.residency.write().await;
        let snapshot = match snapshot {
            Ok(snapshot) => snapshot,
            Err(error) => {
                *residency = Residency::Local;
                self.queue.resume_queue();
                return Err(error);
            }
        };

        let relocation = OutgoingRelocation {
            spec: self.spec.clone(),
            snapshot,
            pending: self.queue.take_all(),
        };
        match self.outbound.relocate(new_owner, relocation, ack).await {
            Ok(_) => {
                let _ = self.queue.close_queue();
                self.activation.lock().await.take();
                *residency = Residency::Remote;
                Ok(true)
            }
            Err(RelocationFailure { error, relocation }) => {
                let requeued = self.queue.push_front_all(relocation.pending);
                *residency = Residency::Local;
                self.queue.resume_queue();
                log_routing!(self.spec.address, "kept", to = %new_owner, error = %error);
                requeued.map_err(|requeue| requeue.into_grid_error(self.spec.address.id()))?;
                Err(error)
            }
        }
    }
}

#[async_trait]
impl Mailbox for RingAwareMailbox {
    async fn send(&self, envelope: Envelope) -> GridResult<()> {
        {
            let residency = self.residency.read().await;
            match *residency {
                Residency::Local | Residency::Relocating => return self.push_local(envelope),
                Residency::Remote => {
                    let owner = self.owner();
                    if owner != self.local_node {
                        log_routing!(self.spec.address, "remote", owner = %owner);
                        self.outbound
                            .grid_deliver(owner, self.spec.clone(), envelope.work, envelope.reply)
                            .await?;
                        return Ok(());
                    }
                }
            }
        }

        // the ring names this node again
        let mut residency = self.residency.write().await;
        if *residency == Residency::Remote {
            self.localize_locked(&mut residency, None, Vec::new()).await?;
            log_routing!(self.spec.address, "localized");
        }
        self.push_local(envelope)
    }

    async fn receive(&self) -> Option<Envelope> {
        if *self.residency.read().await == Residency::Remote {
            return None;
        }
        self.queue.pop().await
    }

    async fn close(&self) {
        let _ = self.queue.close_queue();
        self.activation.lock().await.take();
    }

    async fn is_closed(&self) -> bool {
        if *self.residency.read().await == Residency::Remote {
            return false;
        }
        self.queue.state() == QueueState::Closed
    }

    async fn pending_count(&self) -> usize {
        if *self.residency.read().await == Residency::Remote {
            return 0;
        }
        self.queue.len()
    }

    fn suspend(&self) -> bool {
        self.queue.suspend_queue()
    }

    fn resume(&self) -> bool {
        self.queue.resume_queue()
    }

    fn is_suspended(&self) -> bool {
        self.queue.state() == QueueState::Suspended
    }

    fn drain_pending(&self) -> Vec<Envelope> {
        self.queue.take_all()
    }

    fn path(&self) -> &str {
        self.spec.address.id()
    }
}
