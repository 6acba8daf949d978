pub mod codec;
pub mod message;
pub mod visitor;

pub use codec::{Codec, JsonCodec, WIRE_VERSION};
pub use message::{Answer, ControlMessage, CorrelationId, Forward, GridDeliver, Relocate, Start};
pub use visitor::MessageVisitor;
