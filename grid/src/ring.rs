//! # Consistent Hashing Ring
//!
//! Maps an address id to the node that owns it. Every node contributes
//! `points_per_node` virtual points, each the Murmur3 hash of the node id
//! concatenated with the point index. A key belongs to the first point whose
//! hash is greater than or equal to the key's hash, wrapping around to the
//! first point of the ring.
//!
//! Two rings with the same membership and the same point count agree on
//! every lookup. Ties between equal point hashes are broken by node id.
//!
//! [`SharedRing`] is the copy-on-write handle the rest of the grid uses:
//! lookups read an immutable snapshot, and membership changes are serialized
//! through a single writer that publishes a new snapshot atomically.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, RwLock};

use grid_api::types::NodeId;

const KEY_SEED: u32 = 0;

/// One virtual node on the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RingPoint {
    pub hash: u32,
    pub node: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashRing {
    points_per_node: usize,
    points: Vec<RingPoint>,
    nodes: BTreeSet<NodeId>,
}

impl HashRing {
    /// A ring whose nodes contribute `points_per_node` points each, at least one.
    pub fn new(points_per_node: usize) -> Self {
        let points_per_node = points_per_node.max(1);
        Self {
            points_per_node,
            points: Vec::with_capacity(points_per_node),
            nodes: BTreeSet::new(),
        }
    }

    /// Adds the node's points. Returns `false` if the node was already present.
    pub fn include_node(&mut self, node: NodeId) -> bool {
        if !self.nodes.insert(node) {
            return false;
        }
        self.points.reserve(self.points_per_node);
        for index in 0..self.points_per_node {
            self.points.push(RingPoint {
                hash: point_hash(node, index),
                node,
            });
        }
        self.points.sort_unstable();
        true
    }

    /// Removes exactly the node's points. Returns `false` if it was absent.
    pub fn exclude_node(&mut self, node: NodeId) -> bool {
        if !self.nodes.remove(&node) {
            return false;
        }
        self.points.retain(|point| point.node != node);
        true
    }

    /// Owner of `key`, or `None` on an empty ring.
    pub fn node_of(&self, key: &str) -> Option<NodeId> {
        if self.points.is_empty() {
            return None;
        }
        let hash = murmur3_32(key.as_bytes(), KEY_SEED);
        let index = self.points.partition_point(|point| point.hash < hash);
        let point = self.points.get(index).unwrap_or(&self.points[0]);
        Some(point.node)
    }

    /// Whether `node` owns `key` under this ring.
    pub fn is_owner(&self, node: NodeId, key: &str) -> bool {
        self.node_of(key) == Some(node)
    }

    /// An independent snapshot.
    pub fn copy(&self) -> HashRing {
        self.clone()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().copied()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn points_per_node(&self) -> usize {
        self.points_per_node
    }

    pub fn points(&self) -> &[RingPoint] {
        &self.points
    }
}

fn point_hash(node: NodeId, index: usize) -> u32 {
    murmur3_32(format!("{node}{index}").as_bytes(), KEY_SEED)
}

/// Murmur3 x86 32-bit.
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut hash = seed;
    let chunks = data.chunks_exact(4);
    let tail = chunks.remainder();

    for chunk in chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        hash ^= k;
        hash = hash.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    if !tail.is_empty() {
        let mut k = 0u32;
        for (i, byte) in tail.iter().enumerate() {
            k ^= u32::from(*byte) << (8 * i);
        }
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        hash ^= k;
    }

    hash ^= data.len() as u32;
    hash ^= hash >> 16;
    hash = hash.wrapping_mul(0x85eb_ca6b);
    hash ^= hash >> 13;
    hash = hash.wrapping_mul(0xc2b2_ae35);
    hash ^= hash >> 16;
    hash
}

/// Membership change applied through [`SharedRing::update`].
#[derive(Debug, Clone)]
pub struct RingChange<R> {
    pub before: Arc<HashRing>,
    pub after: Arc<HashRing>,
    pub outcome: R,
}

/// Shared, copy-on-write ring handle.
#[derive(Debug, Clone)]
pub struct SharedRing {
    current: Arc<RwLock<Arc<HashRing>>>,
    writer: Arc<Mutex<()>>,
}

impl SharedRing {
    pub fn new(ring: HashRing) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(ring))),
            writer: Arc::new(Mutex::new(())),
        }
    }

    /// The ring as of now. Later updates never touch the returned snapshot.
    pub fn snapshot(&self) -> Arc<HashRing> {
        let guard = self.current.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    pub fn node_of(&self, key: &str) -> Option<NodeId> {
        self.snapshot().node_of(key)
    }

    /// Applies `change` to a private copy and publishes it.
    ///
    /// Updates are serialized; `before` is exactly the snapshot `after` was
    /// derived from, so the pair can be diffed safely.
    pub fn update<R>(&self, change: impl FnOnce(&mut HashRing) -> R) -> RingChange<R> {
        let _writer = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = self.snapshot();
        let mut next = before.copy();
        let outcome = change(&mut next);
        let after = Arc::new(next);
        {
            let mut guard = self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            *guard = Arc::clone(&after);
        }
        RingChange {
            before,
            after,
            outcome,
        }
    }
}
