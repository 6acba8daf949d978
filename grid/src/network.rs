//! In-process transport connecting grid nodes through `flume` channels.
//!
//! Each node owns one inbound channel; every sender writes to it in send
//! order, which gives the per-connection ordering the grid relies on.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use grid_api::errors::GridError;
use grid_api::transport::Transport;
use grid_api::types::{GridResult, NodeId};

/// One encoded control message and the node it came from.
#[derive(Debug, Clone)]
pub struct Frame {
    pub source: NodeId,
    pub bytes: Vec<u8>,
}

type Routes = HashMap<NodeId, flume::Sender<Frame>>;

#[derive(Clone, Default)]
pub struct MemoryNetwork {
    routes: Arc<Mutex<Routes>>,
}

impl fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nodes: Vec<NodeId> = self.lock().keys().copied().collect();
        f.debug_struct("MemoryNetwork").field("nodes", &nodes).finish()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Routes> {
        self.routes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Attaches `node`, replacing any previous attachment.
    pub fn connect(&self, node: NodeId) -> (Arc<MemoryTransport>, flume::Receiver<Frame>) {
        let (tx, rx) = flume::unbounded();
        self.lock().insert(node, tx);
        let transport = Arc::new(MemoryTransport {
            local: node,
            network: self.clone(),
        });
        (transport, rx)
    }

    /// Detaches `node`; later sends to it fail as unavailable.
    pub fn disconnect(&self, node: NodeId) -> bool {
        self.lock().remove(&node).is_some()
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        self.lock().contains_key(&node)
    }

    fn route(&self, node: NodeId) -> Option<flume::Sender<Frame>> {
        self.lock().get(&node).cloned()
    }
}

/// A node's view of the [`MemoryNetwork`].
#[derive(Debug)]
pub struct MemoryTransport {
    local: NodeId,
    network: MemoryNetwork,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_node(&self) -> NodeId {
        self.local
    }

    async fn send(&self, destination: NodeId, bytes: Vec<u8>) -> GridResult<()> {
        let Some(route) = self.network.route(destination) else {
            return Err(GridError::Unavailable(format!("node {destination} is not connected")));
        };
        route
            .send_async(Frame {
                source: self.local,
                bytes,
            })
            .await
            .map_err(|_| GridError::Unavailable(format!("node {destination} stopped receiving")))
    }
}
