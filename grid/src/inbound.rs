//! # Inbound Handler
//!
//! Decodes frames from the transport and dispatches them through
//! [`GridVisitor`]. All inbound work passes one [`HealthGate`], so nothing is
//! executed while the cluster is unhealthy and everything deferred runs in
//! arrival order once it recovers.
//!
//! Start, GridDeliver and Relocate are re-validated against this node's ring:
//! when another node now owns the address the message is forwarded there
//! instead of executed. Answers are matched by correlation id only.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use grid_api::actor::ActorSpec;
use grid_api::address::Address;
use grid_api::errors::{FailureReason, GridError};
use grid_api::types::{BoxedFuture, GridResult, NodeId, Payload};

use crate::buffer::HealthGate;
use crate::config::GridConfig;
use crate::correlation::ReplyReceiver;
use crate::directory::Directory;
use crate::{log_relocation, log_routing};
use crate::mailbox::{Envelope, Mailbox, Restore};
use crate::outbound::OutboundControl;
use crate::protocol::codec::Codec;
use crate::protocol::message::{
    Answer, ControlMessage, CorrelationId, GridDeliver, Relocate, Start,
};
use crate::protocol::visitor::MessageVisitor;
use crate::ring::SharedRing;

/// Executes control messages on the local node.
#[derive(Debug)]
pub struct GridVisitor {
    local: NodeId,
    ring: SharedRing,
    directory: Arc<Directory>,
    outbound: Arc<OutboundControl>,
    /// Bound on waiting for a local result before answering with a timeout.
    reply_timeout: Duration,
}

impl GridVisitor {
    pub fn new(
        local: NodeId,
        ring: SharedRing,
        directory: Arc<Directory>,
        outbound: Arc<OutboundControl>,
        reply_timeout: Duration,
    ) -> Self {
        Self {
            local,
            ring,
            directory,
            outbound,
            reply_timeout,
        }
    }

    /// The current owner of `address` when it is not this node.
    fn owner_elsewhere(&self, address: &Address) -> Option<NodeId> {
        if !address.is_distributable() {
            return None;
        }
        match self.ring.node_of(address.id()) {
            Some(owner) if owner != self.local => Some(owner),
            _ => None,
        }
    }

    async fn forward(
        &self,
        owner: NodeId,
        sender: NodeId,
        message: ControlMessage,
    ) -> GridResult<()> {
        if let Some(address) = message.address() {
            log_routing!(address, "forward", owner = %owner, original_sender = %sender);
        }
        self.outbound.forward(owner, sender, message).await
    }

    /// Answers `recipient` once `reply` resolves.
    ///
    /// Exactly one of success, failure or timeout is answered.
    fn answer_when_done(&self, reply: ReplyReceiver, recipient: NodeId, correlation_id: CorrelationId) {
        let outbound = Arc::clone(&self.outbound);
        let timeout = self.reply_timeout;
        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, reply).await {
                Ok(Ok(Ok(payload))) => Ok(payload),
                Ok(Ok(Err(error))) => Err(FailureReason::from(&error)),
                Ok(Err(_)) => Err(FailureReason::Unavailable(
                    "actor stopped before replying".to_string(),
                )),
                Err(_) => Err(FailureReason::Timeout),
            };
            if let Err(error) = outbound.answer(recipient, correlation_id, outcome).await {
                warn!(
                    to = %recipient,
                    correlation_id = %correlation_id,
                    error = %error,
                    "failed to send answer"
                );
            }
        });
    }

    async fn reject(
        &self,
        recipient: NodeId,
        correlation_id: Option<CorrelationId>,
        error: GridError,
    ) -> GridResult<()> {
        if let Some(id) = correlation_id {
            self.outbound
                .answer(recipient, id, Err(FailureReason::from(&error)))
                .await?;
        }
        Err(error)
    }

    /// Turns a delivered unit of work into a local envelope, arming the answer
    /// pipeline for correlated work.
    fn envelope_for(&self, deliver: GridDeliver, sender: NodeId) -> Envelope {
        match deliver.correlation_id {
            Some(id) => {
                let (tx, rx) = oneshot::channel();
                self.answer_when_done(rx, sender, id);
                Envelope::ask(deliver.work, tx)
            }
            None => Envelope::tell(deliver.work),
        }
    }
}

#[async_trait]
impl MessageVisitor for GridVisitor {
    async fn visit_start(&self, _receiver: NodeId, sender: NodeId, message: Start) -> GridResult<()> {
        if let Some(owner) = self.owner_elsewhere(&message.address) {
            return self.forward(owner, sender, message.into()).await;
        }
        let spec = ActorSpec::new(message.protocol, message.address, message.params);
        self.directory.ensure_local(&spec).await?;
        debug!(address = %spec.address, from = %sender, "actor started on request");
        Ok(())
    }

    async fn visit_deliver(
        &self,
        _receiver: NodeId,
        sender: NodeId,
        message: GridDeliver,
    ) -> GridResult<()> {
        if let Some(owner) = self.owner_elsewhere(&message.address) {
            return self.forward(owner, sender, message.into()).await;
        }
        let spec = ActorSpec::new(
            message.protocol.clone(),
            message.address.clone(),
            message.params.clone(),
        );
        let correlation_id = message.correlation_id;
        let mailbox = match self.directory.ensure_local(&spec).await {
            Ok(mailbox) => mailbox,
            Err(error) => return self.reject(sender, correlation_id, error).await,
        };
        log_routing!(spec.address, "local", operation = %message.operation(), from = %sender);
        // a failed push drops the envelope's reply channel and the pipeline answers
        mailbox.send(self.envelope_for(message, sender)).await
    }

    async fn visit_answer(
        &self,
        _receiver: NodeId,
        sender: NodeId,
        message: Answer,
    ) -> GridResult<()> {
        debug!(correlation_id = %message.correlation_id, from = %sender, "answer received");
        self.outbound
            .correlations()
            .complete(message.correlation_id, message.outcome);
        Ok(())
    }

    async fn visit_relocate(
        &self,
        _receiver: NodeId,
        sender: NodeId,
        message: Relocate,
    ) -> GridResult<()> {
        if let Some(owner) = self.owner_elsewhere(&message.address) {
            return self.forward(owner, sender, message.into()).await;
        }
        let Relocate {
            protocol,
            address,
            params,
            snapshot,
            pending,
            correlation_id,
        } = message;
        let spec = ActorSpec::new(protocol, address, params);
        let mailbox = match self.directory.allocate_for_restore(&spec) {
            Ok((mailbox, _)) => mailbox,
            Err(error) => return self.reject(sender, correlation_id, error).await,
        };

        let count = pending.len();
        let envelopes: Vec<Envelope> = pending
            .into_iter()
            .map(|deliver| self.envelope_for(deliver, sender))
            .collect();
        let progress = match mailbox.restore(snapshot, envelopes).await {
            Ok(progress) => progress,
            Err(error) => return self.reject(sender, correlation_id, error).await,
        };
        match progress {
            Restore::Applied => {
                log_relocation!(spec.address, "restored", from = %sender, pending = count);
                if let Some(id) = correlation_id {
                    self.outbound.answer(sender, id, Ok(Payload::Null)).await?;
                }
            }
            in_progress @ Restore::InProgress(_) => {
                // the running handler must not hold up the frames behind this one
                log_relocation!(spec.address, "merging", from = %sender, pending = count);
                let outbound = Arc::clone(&self.outbound);
                let address = spec.address;
                tokio::spawn(async move {
                    let outcome = match in_progress.finished().await {
                        Ok(()) => {
                            log_relocation!(address, "restored", from = %sender, pending = count);
                            Ok(Payload::Null)
                        }
                        Err(error) => {
                            warn!(address = %address, from = %sender, error = %error, "restore failed");
                            Err(FailureReason::from(&error))
                        }
                    };
                    if let Some(id) = correlation_id {
                        if let Err(error) = outbound.answer(sender, id, outcome).await {
                            warn!(to = %sender, correlation_id = %id, error = %error, "failed to send relocation ack");
                        }
                    }
                });
            }
        }
        Ok(())
    }
}

/// Entry point for frames arriving from the transport.
#[derive(Debug)]
pub struct InboundHandler {
    local: NodeId,
    codec: Arc<dyn Codec>,
    gate: HealthGate,
    visitor: Arc<GridVisitor>,
}

impl InboundHandler {
    pub fn new(
        local: NodeId,
        codec: Arc<dyn Codec>,
        visitor: Arc<GridVisitor>,
        config: &GridConfig,
    ) -> Self {
        Self {
            local,
            codec,
            gate: HealthGate::new("inbound", config.starts_open(), config.health_buffering),
            visitor,
        }
    }

    /// Decodes `bytes` from `source` and executes or defers the message.
    ///
    /// A decode failure drops the frame and is reported; the connection is
    /// unaffected.
    pub async fn receive(&self, bytes: &[u8], source: NodeId) -> GridResult<()> {
        let message = match self.codec.decode(bytes) {
            Ok(message) => message,
            Err(error) => {
                warn!(from = %source, len = bytes.len(), error = %error, "dropping undecodable frame");
                return Err(error.into());
            }
        };
        debug!(from = %source, kind = message.kind(), "control message received");

        let local = self.local;
        let visitor = Arc::clone(&self.visitor);
        self.gate
            .submit(Box::new(move || -> BoxedFuture<'static, ()> {
                Box::pin(async move {
                    let kind = message.kind();
                    if let Err(error) = message.accept(local, source, visitor.as_ref()).await {
                        warn!(from = %source, kind, error = %error, "control message failed");
                    }
                })
            }))
            .await;
        Ok(())
    }

    /// Opens or closes the inbound gate. Returns the number of deferred
    /// messages executed.
    pub async fn set_health(&self, healthy: bool) -> usize {
        if healthy {
            self.gate.open().await
        } else {
            self.gate.close();
            0
        }
    }

    pub fn buffered(&self) -> usize {
        self.gate.len()
    }

    pub fn visitor(&self) -> &Arc<GridVisitor> {
        &self.visitor
    }
}
