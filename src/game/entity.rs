//! Game entities
//!
//! [`Character`] is the in-game player bound to a connection after login.
//! Map and dispatch code only depend on the small capability traits
//! below, not on the concrete type.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use super::persistence::CharacterRecord;
use crate::error::{Result, TransportError};
use crate::net::{Connection, ConnectionId};
use crate::protocol::Packet;

/// Name markers that grant privileged diagnostics
const PRIVILEGED_MARKERS: [&str; 2] = ["[GM]", "[PM]"];

/// Entity with a position on a map
pub trait Positionable {
    /// Map the entity is placed on
    fn map_id(&self) -> u32;

    /// Tile coordinates
    fn position(&self) -> (u16, u16);

    fn set_position(&self, map_id: u32, x: u16, y: u16);
}

/// Entity that can receive frames
#[async_trait]
pub trait Sendable: Send + Sync {
    /// Queue an encoded frame
    async fn send_frame(&self, frame: Bytes) -> Result<()>;

    /// Encode and queue a message
    async fn send_packet<P: Packet>(&self, packet: &P) -> Result<()>
    where
        Self: Sized,
    {
        self.send_frame(packet.encode()).await
    }
}

/// Entity that can be entered into a map
pub trait MapEnterable {
    /// Map the entity has entered, if any
    fn current_map(&self) -> Option<u32>;

    fn enter_map(&self, map_id: u32);

    /// Leave the current map, returning it
    fn leave_map(&self) -> Option<u32>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Location {
    map_id: u32,
    x: u16,
    y: u16,
}

/// Player character bound to a connection
#[derive(Debug)]
pub struct Character {
    record: CharacterRecord,
    connection_id: ConnectionId,
    connection: Weak<Connection>,
    location: RwLock<Location>,
    current_map: RwLock<Option<u32>>,
}

impl Character {
    /// Load a character from storage and bind it to a connection
    pub fn from_record(record: CharacterRecord, connection: &Arc<Connection>) -> Self {
        let location = Location {
            map_id: record.map_id,
            x: record.x,
            y: record.y,
        };
        Self {
            record,
            connection_id: connection.id,
            connection: Arc::downgrade(connection),
            location: RwLock::new(location),
            current_map: RwLock::new(None),
        }
    }

    pub fn identity(&self) -> u32 {
        self.record.identity
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn account_id(&self) -> u32 {
        self.record.account_id
    }

    pub fn mesh(&self) -> u16 {
        self.record.mesh
    }

    pub fn level(&self) -> u8 {
        self.record.level
    }

    /// Connection the character was loaded on
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// The owning connection while it is alive
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.connection.upgrade()
    }

    /// Close the owning connection
    pub fn disconnect(&self) {
        if let Some(connection) = self.connection() {
            connection.disconnect();
        }
    }

    /// Whether the character may see server diagnostics
    pub fn is_privileged(&self) -> bool {
        PRIVILEGED_MARKERS
            .iter()
            .any(|marker| self.record.name.contains(marker))
    }

    /// Snapshot for saving
    pub fn to_record(&self) -> CharacterRecord {
        let location = *self.location.read();
        CharacterRecord {
            map_id: location.map_id,
            x: location.x,
            y: location.y,
            ..self.record.clone()
        }
    }
}

impl Positionable for Character {
    fn map_id(&self) -> u32 {
        self.location.read().map_id
    }

    fn position(&self) -> (u16, u16) {
        let location = self.location.read();
        (location.x, location.y)
    }

    fn set_position(&self, map_id: u32, x: u16, y: u16) {
        *self.location.write() = Location { map_id, x, y };
    }
}

#[async_trait]
impl Sendable for Character {
    async fn send_frame(&self, frame: Bytes) -> Result<()> {
        match self.connection() {
            Some(connection) => connection.send(frame),
            None => Err(TransportError::ConnectionClosed.into()),
        }
    }
}

impl MapEnterable for Character {
    fn current_map(&self) -> Option<u32> {
        *self.current_map.read()
    }

    fn enter_map(&self, map_id: u32) {
        *self.current_map.write() = Some(map_id);
    }

    fn leave_map(&self) -> Option<u32> {
        self.current_map.write().take()
    }
}

/// Pending character creation for an account without a character
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreationTicket {
    pub account_id: u32,
    /// Token the client echoes in its registration request
    pub token: u32,
}
