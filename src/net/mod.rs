//! Network module
//!
//! This module handles all network-related functionality:
//! - Little-endian packet buffers
//! - Connection actors and their lifecycle
//! - TCP listener with framing, footer handling and per-connection writers

pub mod buffer;
pub mod connection;
pub mod listener;

pub use buffer::{PacketReader, PacketWriter};
pub use connection::{Connection, ConnectionId, ConnectionState, Outbound, PendingConnection};
pub use listener::{ConnectionHooks, ListenerOptions, TcpServerListener};
