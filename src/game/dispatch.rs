//! Packet dispatch table
//!
//! Maps each wire type tag to a decoder producing a boxed [`MessageHandler`].
//! The table is built once at startup and read concurrently afterwards.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{DecodeError, Result};
use crate::net::Connection;
use crate::protocol::{FrameHeader, MsgAction, MsgConnect, MsgRegister, MsgTalk, Packet, PacketType};
use crate::state::ServerState;

/// A decoded message that knows how to process itself
#[async_trait]
pub trait MessageHandler: Send + Sync + fmt::Debug {
    /// Wire type of the message
    fn packet_type(&self) -> PacketType;

    /// Process the message for a connection
    async fn process(&self, state: &Arc<ServerState>, connection: &Arc<Connection>) -> Result<()>;
}

/// Decoder for one message type
pub type Decoder = fn(&[u8]) -> std::result::Result<Box<dyn MessageHandler>, DecodeError>;

fn decode_boxed<M>(frame: &[u8]) -> std::result::Result<Box<dyn MessageHandler>, DecodeError>
where
    M: Packet + MessageHandler,
{
    Ok(Box::new(M::decode(frame)?))
}

/// Tag to decoder table
pub struct PacketRegistry {
    decoders: HashMap<u16, Decoder>,
}

impl PacketRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Registry with every message the game server handles
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register::<MsgRegister>();
        registry.register::<MsgTalk>();
        registry.register::<MsgConnect>();
        registry.register::<MsgAction>();
        registry
    }

    /// Register a message type under its wire tag
    pub fn register<M>(&mut self)
    where
        M: Packet + MessageHandler,
    {
        self.decoders.insert(M::TYPE.as_u16(), decode_boxed::<M>);
    }

    pub fn contains(&self, packet_type: u16) -> bool {
        self.decoders.contains_key(&packet_type)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Decode a frame into its handler
    ///
    /// Tags without a decoder fail with [`DecodeError::UnknownType`].
    pub fn decode(&self, frame: &[u8]) -> std::result::Result<Box<dyn MessageHandler>, DecodeError> {
        let header = FrameHeader::parse(frame)?;
        match self.decoders.get(&header.packet_type) {
            Some(decoder) => decoder(frame),
            None => Err(DecodeError::UnknownType(header.packet_type)),
        }
    }
}

impl Default for PacketRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for PacketRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.decoders.keys().copied().collect();
        tags.sort_unstable();
        f.debug_struct("PacketRegistry").field("tags", &tags).finish()
    }
}
