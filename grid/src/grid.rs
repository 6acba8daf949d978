//! # Grid
//!
//! The placement authority of one node. It owns the shared ring, the
//! correlation table, outbound control, the inbound handler and the
//! directory of known addresses, and is the single path membership events
//! take into the ring.
//!
//! ## Node join
//!
//! ```text
//! 1. before = ring snapshot
//! 2. after  = ring with the new node included (published atomically)
//! 3. for every hosted address owned here under `before` but not `after`:
//!      suspend, wait for the in-flight handler, snapshot,
//!      drain the queue, send Relocate to the new owner
//! ```
//!
//! Node-left only excludes the node from the ring. Actors that lived only on
//! the departed node are not reconstructed.

use std::fmt;
use std::sync::{Arc, Weak};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn, Instrument};

use grid_api::actor::{ActorFactory, ActorSpec, Residency};
use grid_api::address::{Address, AddressFactory};
use grid_api::membership::ClusterEvent;
use grid_api::transport::Transport;
use grid_api::types::{GridResult, NodeId, Payload};

use crate::config::GridConfig;
use crate::correlation::CorrelationTable;
use crate::directory::Directory;
use crate::inbound::{GridVisitor, InboundHandler};
use crate::mailbox::RingAwareMailbox;
use crate::network::Frame;
use crate::node_span;
use crate::outbound::OutboundControl;
use crate::protocol::codec::{Codec, JsonCodec};
use crate::reference::GridRef;
use crate::relocation;
use crate::ring::{HashRing, SharedRing};

pub struct Grid {
    local: NodeId,
    config: GridConfig,
    ring: SharedRing,
    correlations: Arc<CorrelationTable>,
    outbound: Arc<OutboundControl>,
    directory: Arc<Directory>,
    inbound: InboundHandler,
    addresses: AddressFactory,
    /// Serializes membership events.
    membership: Mutex<()>,
}

impl fmt::Debug for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grid")
            .field("local", &self.local)
            .field("nodes", &self.ring.snapshot().node_count())
            .field("directory", &self.directory)
            .field("correlations", &self.correlations)
            .finish()
    }
}

impl Grid {
    /// A grid node speaking the default JSON codec over `transport`.
    pub fn new(config: GridConfig, transport: Arc<dyn Transport>) -> Arc<Self> {
        Self::with_codec(config, transport, Arc::new(JsonCodec))
    }

    pub fn with_codec(
        config: GridConfig,
        transport: Arc<dyn Transport>,
        codec: Arc<dyn Codec>,
    ) -> Arc<Self> {
        let local = transport.local_node();

        let mut ring = HashRing::new(config.points_per_node);
        ring.include_node(local);
        let ring = SharedRing::new(ring);

        let correlations = CorrelationTable::new(config.correlation_timeout);
        let outbound = Arc::new(OutboundControl::new(
            local,
            Arc::clone(&codec),
            transport,
            Arc::clone(&correlations),
            &config,
        ));
        let directory = Arc::new(Directory::new(
            local,
            ring.clone(),
            Arc::clone(&outbound),
            &config,
        ));
        let visitor = Arc::new(GridVisitor::new(
            local,
            ring.clone(),
            Arc::clone(&directory),
            Arc::clone(&outbound),
            config.correlation_timeout,
        ));
        let inbound = InboundHandler::new(local, codec, visitor, &config);

        info!(
            node = %local,
            points_per_node = config.points_per_node,
            timeout_ms = config.correlation_timeout.as_millis() as u64,
            "grid node created"
        );

        Arc::new(Self {
            local,
            config,
            ring,
            correlations,
            outbound,
            directory,
            inbound,
            addresses: AddressFactory::new(),
            membership: Mutex::new(()),
        })
    }

    pub fn local_node(&self) -> NodeId {
        self.local
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn address_factory(&self) -> &AddressFactory {
        &self.addresses
    }

    /// The ring as of now.
    pub fn ring(&self) -> Arc<HashRing> {
        self.ring.snapshot()
    }

    pub fn node_of(&self, address: &Address) -> Option<NodeId> {
        self.ring.node_of(address.id())
    }

    pub fn correlations(&self) -> &Arc<CorrelationTable> {
        &self.correlations
    }

    pub fn outbound(&self) -> &Arc<OutboundControl> {
        &self.outbound
    }

    pub fn inbound(&self) -> &InboundHandler {
        &self.inbound
    }

    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    /// Registers the factory that builds actors of `protocol`.
    ///
    /// Every node that may own such actors must register the same protocol.
    pub fn register_protocol<F>(&self, protocol: impl Into<String>, factory: F)
    where
        F: ActorFactory,
    {
        self.directory.register_protocol(protocol, Arc::new(factory));
    }

    /// The mailbox for `spec` on this node.
    pub fn allocate_mailbox(&self, spec: &ActorSpec) -> GridResult<Arc<RingAwareMailbox>> {
        self.directory.allocate(spec).map(|(mailbox, _)| mailbox)
    }

    /// A reference to the actor at `address`, wherever the ring places it.
    ///
    /// When another node owns the address and this node has not seen it
    /// before, a `Start` is sent so the owner builds the actor eagerly.
    pub async fn actor_for(
        &self,
        protocol: impl Into<String>,
        params: Payload,
        address: Address,
    ) -> GridResult<GridRef> {
        let spec = ActorSpec::new(protocol, address, params);
        let (mailbox, created) = self.directory.allocate(&spec)?;
        if created && mailbox.residency().await == Residency::Remote {
            let owner = mailbox.owner();
            if let Err(error) = self.outbound.start(owner, spec).await {
                warn!(address = %mailbox.address(), owner = %owner, error = %error, "start not delivered");
            }
        }
        Ok(GridRef::new(mailbox, self.config.correlation_timeout))
    }

    /// Applies one membership signal.
    pub async fn on_event(&self, event: ClusterEvent) {
        match event {
            ClusterEvent::NodeJoined(node) => {
                self.node_joined(node).await;
            }
            ClusterEvent::NodeLeft(node) => {
                self.node_left(node).await;
            }
            ClusterEvent::HealthChanged { healthy } => {
                self.set_health(healthy).await;
            }
        }
    }

    /// Includes `node` in the ring and relocates what it now owns.
    ///
    /// Returns the number of actors handed to it. A node already in the ring
    /// changes nothing.
    pub async fn node_joined(&self, node: NodeId) -> usize {
        let _membership = self.membership.lock().await;
        let change = self.ring.update(|ring| ring.include_node(node));
        if !change.outcome {
            return 0;
        }
        info!(node = %self.local, joined = %node, nodes = change.after.node_count(), "node joined");

        let moves = relocation::plan(
            &change.before,
            &change.after,
            self.local,
            self.directory.distributable(),
        )
        .await;
        if moves.is_empty() {
            return 0;
        }
        let relocated = relocation::execute(moves).await;
        info!(node = %self.local, to = %node, relocated, "relocation finished");
        relocated
    }

    /// Excludes `node` from the ring and drops anything still buffered for it.
    pub async fn node_left(&self, node: NodeId) -> bool {
        let _membership = self.membership.lock().await;
        if node == self.local {
            warn!(node = %node, "ignoring departure of the local node");
            return false;
        }
        let change = self.ring.update(|ring| ring.exclude_node(node));
        self.outbound.node_left(node);
        if change.outcome {
            info!(node = %self.local, left = %node, nodes = change.after.node_count(), "node left");
        }
        change.outcome
    }

    /// Opens or closes the outbound and inbound gates.
    ///
    /// Returns how many deferred sends and dispatches ran.
    pub async fn set_health(&self, healthy: bool) -> usize {
        info!(node = %self.local, healthy, "cluster health changed");
        let sent = self.outbound.set_cluster_health(healthy).await;
        let dispatched = self.inbound.set_health(healthy).await;
        sent + dispatched
    }

    /// Hands one frame from the transport to the inbound handler.
    pub async fn receive(&self, bytes: &[u8], source: NodeId) -> GridResult<()> {
        self.inbound.receive(bytes, source).await
    }

    /// Pumps `frames` into this grid until the channel closes or the grid is dropped.
    pub fn spawn_receiver(self: &Arc<Self>, frames: flume::Receiver<Frame>) -> JoinHandle<()> {
        let grid: Weak<Self> = Arc::downgrade(self);
        let span = node_span!(self.local, component = "receiver");
        tokio::spawn(
            async move {
                while let Ok(frame) = frames.recv_async().await {
                    let Some(grid) = grid.upgrade() else {
                        break;
                    };
                    // decode failures are logged by the handler; keep reading
                    let _ = grid.receive(&frame.bytes, frame.source).await;
                }
            }
            .instrument(span),
        )
    }
}
