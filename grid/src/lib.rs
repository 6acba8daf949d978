// Placement grid implementation
//
// Decides which node owns each distributable actor, routes work to that node
// and moves actors when membership changes. Types shared with the runtime,
// the membership subsystem and the transport live in `grid-api`.

pub mod buffer;
pub mod config;
pub mod correlation;
pub mod directory;
pub mod error;
pub mod grid;
pub mod inbound;
pub mod logging;
pub mod mailbox;
pub mod network;
pub mod outbound;
pub mod processor;
pub mod protocol;
pub mod reference;
pub mod relocation;
pub mod ring;

// Re-export commonly used types
pub use config::GridConfig;
pub use error::{CodecError, MailboxError};
pub use grid::Grid;
pub use mailbox::{Envelope, LocalMailbox, Mailbox, RingAwareMailbox};
pub use network::{Frame, MemoryNetwork, MemoryTransport};
pub use protocol::{Codec, ControlMessage, JsonCodec, MessageVisitor};
pub use reference::GridRef;
pub use ring::{HashRing, SharedRing};

pub use grid_api::*;

// Path the exported logging macros expand through.
#[doc(hidden)]
pub use tracing as __tracing;
