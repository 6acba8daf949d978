//! # Grid API
//!
//! Vocabulary shared between the placement grid and its collaborators: the
//! single-node actor runtime, the membership subsystem and the transport.
//!
//! ## Module Organization
//!
//! - [`actor`]: Grid-hosted actor trait, factories and residency states
//! - [`address`]: Actor addressing and the address factory
//! - [`errors`]: Error types and the wire-level failure reason
//! - [`membership`]: Cluster membership and health events
//! - [`transport`]: Ordered node-addressed byte delivery
//! - [`types`]: Node identity, payloads and common aliases

pub mod actor;
pub mod address;
pub mod errors;
pub mod membership;
pub mod transport;
pub mod types;

pub use actor::{ActorFactory, ActorSpec, GridActor, Residency, SharedFactory};
pub use address::{Address, AddressFactory};
pub use errors::{FailureReason, GridError};
pub use membership::ClusterEvent;
pub use transport::Transport;
pub use types::{BoxedFuture, GridResult, NodeId, Payload, UnitOfWork};
