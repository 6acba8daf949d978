use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::types::{BoxedFuture, GridResult, Payload};

/// Everything needed to construct an actor on whichever node owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorSpec {
    /// Name under which the actor's factory is registered.
    pub protocol: String,
    pub address: Address,
    /// Construction parameters handed to the factory.
    pub params: Payload,
}

impl ActorSpec {
    pub fn new(protocol: impl Into<String>, address: Address, params: Payload) -> Self {
        Self {
            protocol: protocol.into(),
            address,
            params,
        }
    }
}

/// Placement-visible lifecycle of an address on one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// This node owns the address and runs its activation.
    Local,
    /// Owned here, suspended while its state is shipped to the new owner.
    Relocating,
    /// Another node owns the address; this node only holds a routing proxy.
    Remote,
}

/// Core actor trait for grid-hosted actors
pub trait GridActor: Send + 'static {
    /// Called once after construction and, on a relocation target, after `restore`
    fn started<'a>(&'a mut self, _address: &'a Address) -> BoxedFuture<'a, GridResult<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Handle one unit of work
    fn handle<'a>(&'a mut self, operation: &'a str, args: Payload) -> BoxedFuture<'a, GridResult<Payload>>;

    /// Produce a state snapshot before relocation
    fn snapshot<'a>(&'a mut self) -> BoxedFuture<'a, GridResult<Payload>> {
        Box::pin(async { Ok(Payload::Null) })
    }

    /// Apply a snapshot produced by `snapshot` on the previous owner
    fn restore<'a>(&'a mut self, _snapshot: Payload) -> BoxedFuture<'a, GridResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Builds actor instances from their construction parameters.
pub trait ActorFactory: Send + Sync + 'static {
    fn create(&self, address: &Address, params: &Payload) -> GridResult<Box<dyn GridActor>>;
}

impl<F> ActorFactory for F
where
    F: Fn(&Address, &Payload) -> GridResult<Box<dyn GridActor>> + Send + Sync + 'static,
{
    fn create(&self, address: &Address, params: &Payload) -> GridResult<Box<dyn GridActor>> {
        self(address, params)
    }
}

pub type SharedFactory = Arc<dyn ActorFactory>;
