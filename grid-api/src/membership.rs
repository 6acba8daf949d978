use serde::{Deserialize, Serialize};

use crate::types::NodeId;

/// Events consumed from the membership subsystem.
///
/// Delivered at least once and in any interleaving with message traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterEvent {
    NodeJoined(NodeId),
    NodeLeft(NodeId),
    HealthChanged { healthy: bool },
}

impl ClusterEvent {
    pub fn node(&self) -> Option<NodeId> {
        match self {
            ClusterEvent::NodeJoined(node) | ClusterEvent::NodeLeft(node) => Some(*node),
            ClusterEvent::HealthChanged { .. } => None,
        }
    }
}
