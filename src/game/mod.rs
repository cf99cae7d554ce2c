//! Game module
//!
//! This module contains the game side of the Embergate server:
//! - Partitioned processors that order work per connection and per map
//! - Packet dispatch table and message handlers
//! - Online character registry and maps
//! - Character persistence
//! - The connection hooks tying it all to the listener

pub mod dispatch;
pub mod entity;
pub mod handlers;
pub mod map;
pub mod persistence;
pub mod processor;
pub mod roles;
pub mod server;

pub use dispatch::{MessageHandler, PacketRegistry};
pub use entity::{Character, CreationTicket, MapEnterable, Positionable, Sendable};
pub use map::{GameMap, MapManager};
pub use persistence::{CharacterRecord, CharacterRepository, InMemoryRepository};
pub use processor::PartitionedProcessor;
pub use roles::RoleManager;
pub use server::GameServer;
