//! # Transport Boundary
//!
//! The grid treats the wire as an ordered, node-addressed byte pipe. Frames
//! sent from one node to another over one transport must arrive in send order;
//! the receive side hands `(bytes, source)` pairs to the grid.

use async_trait::async_trait;

use crate::types::{GridResult, NodeId};

/// Sending half of the transport.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// The node this transport sends from. Receivers see it as the frame's source.
    fn local_node(&self) -> NodeId;

    /// Queue `bytes` for delivery to `destination`.
    async fn send(&self, destination: NodeId, bytes: Vec<u8>) -> GridResult<()>;
}
