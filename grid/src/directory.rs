//! # Directory
//!
//! Per-node registry of actor protocols and of every address this node has a
//! mailbox for, whether it hosts the actor or only routes to it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use grid_api::actor::{ActorSpec, Residency, SharedFactory};
use grid_api::errors::GridError;
use grid_api::types::{GridResult, NodeId};

use crate::config::GridConfig;
use crate::mailbox::RingAwareMailbox;
use crate::outbound::OutboundControl;
use crate::ring::SharedRing;

pub struct Directory {
    local: NodeId,
    ring: SharedRing,
    outbound: Arc<OutboundControl>,
    capacity: Option<usize>,
    /// Registered actor factories by protocol name
    protocols: RwLock<HashMap<String, SharedFactory>>,
    /// Known addresses by id
    mailboxes: RwLock<HashMap<String, Arc<RingAwareMailbox>>>,
}

impl fmt::Debug for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Directory")
            .field("local", &self.local)
            .field("protocols", &read(&self.protocols).len())
            .field("mailboxes", &read(&self.mailboxes).len())
            .finish()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Directory {
    pub fn new(
        local: NodeId,
        ring: SharedRing,
        outbound: Arc<OutboundControl>,
        config: &GridConfig,
    ) -> Self {
        Self {
            local,
            ring,
            outbound,
            capacity: config.mailbox_capacity,
            protocols: RwLock::new(HashMap::new()),
            mailboxes: RwLock::new(HashMap::new()),
        }
    }

    /// Registers (or replaces) the factory for `protocol`.
    pub fn register_protocol(&self, protocol: impl Into<String>, factory: SharedFactory) {
        let protocol = protocol.into();
        debug!(node = %self.local, protocol = %protocol, "protocol registered");
        write(&self.protocols).insert(protocol, factory);
    }

    pub fn factory(&self, protocol: &str) -> GridResult<SharedFactory> {
        read(&self.protocols)
            .get(protocol)
            .cloned()
            .ok_or_else(|| GridError::UnknownProtocol(protocol.to_string()))
    }

    pub fn lookup(&self, address_id: &str) -> Option<Arc<RingAwareMailbox>> {
        read(&self.mailboxes).get(address_id).cloned()
    }

    /// Residency a fresh mailbox gets under the current ring.
    fn initial_residency(&self, spec: &ActorSpec) -> Residency {
        if !spec.address.is_distributable() {
            return Residency::Local;
        }
        match self.ring.node_of(spec.address.id()) {
            Some(owner) if owner != self.local => Residency::Remote,
            _ => Residency::Local,
        }
    }

    /// The mailbox for `spec`, creating it on first use.
    ///
    /// Returns the mailbox and whether it was created by this call.
    pub fn allocate(&self, spec: &ActorSpec) -> GridResult<(Arc<RingAwareMailbox>, bool)> {
        let residency = self.initial_residency(spec);
        self.allocate_with(spec, residency)
    }

    /// Like [`Directory::allocate`] but never activates: a new mailbox starts
    /// `Remote` and waits for the restored state.
    pub fn allocate_for_restore(
        &self,
        spec: &ActorSpec,
    ) -> GridResult<(Arc<RingAwareMailbox>, bool)> {
        self.allocate_with(spec, Residency::Remote)
    }

    fn allocate_with(
        &self,
        spec: &ActorSpec,
        residency: Residency,
    ) -> GridResult<(Arc<RingAwareMailbox>, bool)> {
        if let Some(existing) = self.lookup(spec.address.id()) {
            return Ok((existing, false));
        }
        let factory = self.factory(&spec.protocol)?;

        let mut mailboxes = write(&self.mailboxes);
        if let Some(existing) = mailboxes.get(spec.address.id()) {
            return Ok((Arc::clone(existing), false));
        }
        let mailbox = Arc::new(RingAwareMailbox::new(
            spec.clone(),
            self.local,
            self.ring.clone(),
            Arc::clone(&self.outbound),
            factory,
            self.capacity,
            residency,
        )?);
        mailboxes.insert(spec.address.id().to_string(), Arc::clone(&mailbox));
        debug!(
            node = %self.local,
            address = %spec.address,
            residency = ?residency,
            "mailbox allocated"
        );
        Ok((mailbox, true))
    }

    /// The mailbox for `spec`, hosting the actor on this node.
    pub async fn ensure_local(&self, spec: &ActorSpec) -> GridResult<Arc<RingAwareMailbox>> {
        let (mailbox, _) = self.allocate_for_restore(spec)?;
        mailbox.activate().await?;
        Ok(mailbox)
    }

    /// Every known distributable mailbox.
    pub fn distributable(&self) -> Vec<Arc<RingAwareMailbox>> {
        read(&self.mailboxes)
            .values()
            .filter(|mailbox| mailbox.address().is_distributable())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        read(&self.mailboxes).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
