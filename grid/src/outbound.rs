//! # Outbound Control
//!
//! Builds control messages, registers correlations and hands frames to the
//! transport. Each destination has its own [`HealthGate`]: while the cluster
//! (or that node) is unhealthy, sends become deferred encode-and-transmit
//! actions that run in order once health returns.
//!
//! A correlation id is registered before its message is transmitted or
//! deferred, so it exists by the time any `Answer` could arrive.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use grid_api::actor::ActorSpec;
use grid_api::errors::{FailureReason, GridError};
use grid_api::transport::Transport;
use grid_api::types::{BoxedFuture, GridResult, NodeId, Payload, UnitOfWork};

use crate::buffer::{DeferredAction, HealthGate};
use crate::config::GridConfig;
use crate::correlation::{CorrelationTable, PendingContext, ReplySender};
use crate::log_buffer;
use crate::mailbox::Envelope;
use crate::protocol::codec::Codec;
use crate::protocol::message::{
    Answer, ControlMessage, CorrelationId, Forward, GridDeliver, Relocate, Start,
};

/// Encodes and transmits. Cheap to clone into deferred actions.
#[derive(Clone)]
struct Transmitter {
    codec: Arc<dyn Codec>,
    transport: Arc<dyn Transport>,
}

impl Transmitter {
    async fn transmit(&self, recipient: NodeId, message: &ControlMessage) -> GridResult<()> {
        let bytes = self.codec.encode(message)?;
        debug!(
            to = %recipient,
            kind = message.kind(),
            bytes = bytes.len(),
            "transmitting control message"
        );
        self.transport.send(recipient, bytes).await
    }

    fn deferred(&self, recipient: NodeId, message: ControlMessage) -> DeferredAction {
        let transmitter = self.clone();
        Box::new(move || -> BoxedFuture<'static, ()> {
            Box::pin(async move {
                if let Err(error) = transmitter.transmit(recipient, &message).await {
                    warn!(
                        to = %recipient,
                        kind = message.kind(),
                        error = %error,
                        "deferred transmit failed"
                    );
                }
            })
        })
    }
}

/// State carried out of a relocating node.
#[derive(Debug)]
pub struct OutgoingRelocation {
    pub spec: ActorSpec,
    pub snapshot: Payload,
    /// Local envelopes in arrival order.
    pub pending: Vec<Envelope>,
}

/// A relocation the transport refused, returned intact.
#[derive(Debug)]
pub struct RelocationFailure {
    pub error: GridError,
    pub relocation: OutgoingRelocation,
}

pub struct OutboundControl {
    local: NodeId,
    transmitter: Transmitter,
    correlations: Arc<CorrelationTable>,
    gates: Mutex<HashMap<NodeId, Arc<HealthGate>>>,
    cluster_healthy: AtomicBool,
    buffering: bool,
}

impl fmt::Debug for OutboundControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundControl")
            .field("local", &self.local)
            .field("cluster_healthy", &self.cluster_healthy.load(Ordering::SeqCst))
            .field("gates", &self.lock_gates().len())
            .finish()
    }
}

impl OutboundControl {
    pub fn new(
        local: NodeId,
        codec: Arc<dyn Codec>,
        transport: Arc<dyn Transport>,
        correlations: Arc<CorrelationTable>,
        config: &GridConfig,
    ) -> Self {
        Self {
            local,
            transmitter: Transmitter { codec, transport },
            correlations,
            gates: Mutex::new(HashMap::new()),
            cluster_healthy: AtomicBool::new(config.starts_open()),
            buffering: config.health_buffering,
        }
    }

    fn lock_gates(&self) -> MutexGuard<'_, HashMap<NodeId, Arc<HealthGate>>> {
        self.gates.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn gate(&self, recipient: NodeId) -> Arc<HealthGate> {
        let mut gates = self.lock_gates();
        let gate = gates.entry(recipient).or_insert_with(|| {
            Arc::new(HealthGate::new(
                format!("outbound-{recipient}"),
                self.cluster_healthy.load(Ordering::SeqCst),
                self.buffering,
            ))
        });
        Arc::clone(gate)
    }

    pub fn local_node(&self) -> NodeId {
        self.local
    }

    pub fn correlations(&self) -> &Arc<CorrelationTable> {
        &self.correlations
    }

    /// Transmits now, or defers while `recipient`'s gate is closed.
    pub async fn send(&self, recipient: NodeId, message: ControlMessage) -> GridResult<()> {
        let gate = self.gate(recipient);
        let transmitter = &self.transmitter;
        match gate.defer(message, |message| transmitter.deferred(recipient, message)) {
            None => {
                log_buffer!(gate.name(), "deferred", queued = gate.len());
                Ok(())
            }
            Some(message) => self.transmitter.transmit(recipient, &message).await,
        }
    }

    pub async fn start(&self, recipient: NodeId, spec: ActorSpec) -> GridResult<()> {
        let message = ControlMessage::Start(Start {
            protocol: spec.protocol,
            address: spec.address,
            params: spec.params,
        });
        self.send(recipient, message).await
    }

    /// Sends one unit of work. With `reply`, a correlation is registered first
    /// and its id returned.
    pub async fn grid_deliver(
        &self,
        recipient: NodeId,
        spec: ActorSpec,
        work: UnitOfWork,
        reply: Option<ReplySender>,
    ) -> GridResult<Option<CorrelationId>> {
        let correlation_id = reply.map(|reply| {
            self.correlations.register_new(
                reply,
                PendingContext {
                    address: spec.address.to_string(),
                    operation: work.operation.clone(),
                },
            )
        });
        let message = ControlMessage::GridDeliver(GridDeliver {
            protocol: spec.protocol,
            address: spec.address,
            params: spec.params,
            work,
            correlation_id,
        });
        match self.send(recipient, message).await {
            Ok(()) => Ok(correlation_id),
            Err(error) => {
                if let Some(id) = correlation_id {
                    self.correlations
                        .fail(id, GridError::Transport(error.to_string()));
                }
                Err(error)
            }
        }
    }

    pub async fn answer(
        &self,
        recipient: NodeId,
        correlation_id: CorrelationId,
        outcome: Result<Payload, FailureReason>,
    ) -> GridResult<()> {
        let message = ControlMessage::Answer(Answer {
            correlation_id,
            outcome,
        });
        self.send(recipient, message).await
    }

    /// Re-sends `message` toward its current owner on behalf of `original_sender`.
    pub async fn forward(
        &self,
        recipient: NodeId,
        original_sender: NodeId,
        message: ControlMessage,
    ) -> GridResult<()> {
        let message = match message {
            ControlMessage::Forward(forward) => ControlMessage::Forward(forward),
            other => ControlMessage::Forward(Forward {
                original_sender,
                message: Box::new(other),
            }),
        };
        self.send(recipient, message).await
    }

    /// Ships an actor to its new owner.
    ///
    /// Every pending envelope becomes a `GridDeliver`; envelopes awaiting a
    /// reply get a fresh correlation id bound to the original caller's reply
    /// channel, so the caller is completed by the new owner's answer.
    ///
    /// When the send fails, the relocation is handed back whole: the reply
    /// channels are taken out of the correlation table again, so the caller
    /// can keep the actor where it is. Only the ack is failed.
    pub async fn relocate(
        &self,
        recipient: NodeId,
        relocation: OutgoingRelocation,
        ack: Option<ReplySender>,
    ) -> Result<Option<CorrelationId>, RelocationFailure> {
        let OutgoingRelocation {
            spec,
            snapshot,
            pending,
        } = relocation;
        let address_label = spec.address.to_string();

        let mut rewrapped = Vec::with_capacity(pending.len());
        for envelope in pending {
            let correlation_id = envelope.reply.map(|reply| {
                self.correlations.register_new(
                    reply,
                    PendingContext {
                        address: address_label.clone(),
                        operation: envelope.work.operation.clone(),
                    },
                )
            });
            rewrapped.push(GridDeliver {
                protocol: spec.protocol.clone(),
                address: spec.address.clone(),
                params: spec.params.clone(),
                work: envelope.work,
                correlation_id,
            });
        }

        let correlation_id = ack.map(|ack| {
            self.correlations.register_new(
                ack,
                PendingContext {
                    address: address_label,
                    operation: "relocate".to_string(),
                },
            )
        });
        let kept: Vec<(UnitOfWork, Option<CorrelationId>)> = rewrapped
            .iter()
            .map(|deliver| (deliver.work.clone(), deliver.correlation_id))
            .collect();

        let message = ControlMessage::Relocate(Relocate {
            protocol: spec.protocol.clone(),
            address: spec.address.clone(),
            params: spec.params.clone(),
            snapshot: snapshot.clone(),
            pending: rewrapped,
            correlation_id,
        });
        match self.send(recipient, message).await {
            Ok(()) => Ok(correlation_id),
            Err(error) => {
                if let Some(id) = correlation_id {
                    self.correlations
                        .fail(id, GridError::Transport(error.to_string()));
                }
                let pending = kept
                    .into_iter()
                    .map(|(work, id)| Envelope {
                        work,
                        reply: id.and_then(|id| self.correlations.take(id)),
                    })
                    .collect();
                Err(RelocationFailure {
                    error,
                    relocation: OutgoingRelocation {
                        spec,
                        snapshot,
                        pending,
                    },
                })
            }
        }
    }

    /// Applies a cluster-wide health signal to every destination.
    ///
    /// Returns the number of deferred sends transmitted by the drain.
    pub async fn set_cluster_health(&self, healthy: bool) -> usize {
        let gates: Vec<Arc<HealthGate>> = {
            let gates = self.lock_gates();
            self.cluster_healthy.store(healthy, Ordering::SeqCst);
            gates.values().cloned().collect()
        };
        let mut drained = 0;
        for gate in gates {
            if healthy {
                drained += gate.open().await;
            } else {
                gate.close();
            }
        }
        if healthy && drained > 0 {
            log_buffer!("outbound", "drained", count = drained);
        }
        drained
    }

    /// Applies a health signal for a single destination.
    pub async fn set_node_health(&self, node: NodeId, healthy: bool) -> usize {
        let gate = self.gate(node);
        if healthy {
            gate.open().await
        } else {
            gate.close();
            0
        }
    }

    /// Forgets a departed node, dropping anything still deferred for it.
    pub fn node_left(&self, node: NodeId) -> usize {
        let gate = self.lock_gates().remove(&node);
        let dropped = gate.map(|gate| gate.discard()).unwrap_or(0);
        if dropped > 0 {
            warn!(node = %node, dropped, "discarded deferred sends for departed node");
        }
        dropped
    }

    /// Deferred sends waiting for `node`.
    pub fn buffered_for(&self, node: NodeId) -> usize {
        self.lock_gates().get(&node).map(|gate| gate.len()).unwrap_or(0)
    }
}
