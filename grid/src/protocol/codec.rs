use std::fmt::Debug;

use crate::error::CodecError;
use crate::protocol::message::ControlMessage;

pub const WIRE_VERSION: u8 = 1;

/// Turns control messages into frames and back.
pub trait Codec: Send + Sync + Debug {
    fn encode(&self, message: &ControlMessage) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<ControlMessage, CodecError>;
}

/// JSON body behind a one-byte version prefix.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, message: &ControlMessage) -> Result<Vec<u8>, CodecError> {
        let mut frame = Vec::with_capacity(128);
        frame.push(WIRE_VERSION);
        serde_json::to_writer(&mut frame, message).map_err(|source| CodecError::Encode {
            kind: message.kind(),
            source,
        })?;
        Ok(frame)
    }

    fn decode(&self, bytes: &[u8]) -> Result<ControlMessage, CodecError> {
        let (version, body) = bytes.split_first().ok_or(CodecError::Empty)?;
        if *version != WIRE_VERSION {
            return Err(CodecError::Version(*version));
        }
        serde_json::from_slice(body).map_err(|source| CodecError::Decode {
            len: bytes.len(),
            source,
        })
    }
}
