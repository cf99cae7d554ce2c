//! Connection module
//!
//! A [`Connection`] is the actor behind one accepted socket:
//! - Lifecycle state machine (connecting -> exchanging -> active -> disconnected)
//! - Handshake state while the key exchange is running
//! - Bounded outbound queue drained by the connection's writer task
//! - Close token observed by the read loop and the writer task
//! - Per-connection packet rate window
//! - The character bound to the connection once logged in

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::crypto::{CipherPair, CipherStream};
use crate::error::{Result, TransportError};
use crate::game::entity::{Character, CreationTicket};
use crate::protocol::{Handshake, Packet};

/// Unique connection identifier
pub type ConnectionId = u64;

/// Length of the packet rate window in milliseconds
const RATE_WINDOW_MS: u64 = 1000;

/// Connection state in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Accepted, setup in progress
    Connecting,
    /// Handshake offer sent, waiting for the peer's reply
    Exchanging,
    /// Cipher active, application frames are dispatched
    Active,
    /// Socket closed or closing
    Disconnected,
}

impl ConnectionState {
    /// Get a human-readable name for the state
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Exchanging => "Exchanging",
            ConnectionState::Active => "Active",
            ConnectionState::Disconnected => "Disconnected",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Item queued for the connection's writer task
pub enum Outbound {
    /// Frame written in clear text (the handshake offer)
    Raw(Bytes),
    /// Frame encrypted once the cipher is active
    Frame(Bytes),
    /// Switch the writer to encrypted output; applies to every later item
    StartEncryption(CipherStream),
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outbound::Raw(frame) => write!(f, "Raw({} bytes)", frame.len()),
            Outbound::Frame(frame) => write!(f, "Frame({} bytes)", frame.len()),
            Outbound::StartEncryption(_) => f.write_str("StartEncryption"),
        }
    }
}

/// Accepted socket handed to the accept hook before its connection exists
#[derive(Debug)]
pub struct PendingConnection {
    pub id: ConnectionId,
    pub address: SocketAddr,
    pub outbound: mpsc::Sender<Outbound>,
    pub close: CancellationToken,
}

impl PendingConnection {
    /// Build the connection, bound to a scheduler partition
    pub fn into_connection(self, partition: u32) -> Connection {
        Connection {
            id: self.id,
            guid: Uuid::new_v4(),
            address: self.address,
            partition,
            state: RwLock::new(ConnectionState::Connecting),
            handshake: Mutex::new(None),
            decryptor: Mutex::new(None),
            outbound: self.outbound,
            close: self.close,
            disconnect_notified: AtomicBool::new(false),
            created_at: Instant::now(),
            rate_window_start: AtomicU64::new(0),
            rate_count: AtomicU32::new(0),
            packets_received: AtomicU64::new(0),
            character: RwLock::new(None),
            creation: RwLock::new(None),
        }
    }
}

/// A connected client
pub struct Connection {
    /// Unique connection identifier
    pub id: ConnectionId,
    /// Globally unique handle for this connection
    pub guid: Uuid,
    /// Remote address of the client
    pub address: SocketAddr,
    /// Packet processor partition assigned at accept
    pub partition: u32,
    state: RwLock<ConnectionState>,
    handshake: Mutex<Option<Handshake>>,
    /// Inbound keystream waiting to be taken by the read loop
    decryptor: Mutex<Option<CipherStream>>,
    outbound: mpsc::Sender<Outbound>,
    close: CancellationToken,
    disconnect_notified: AtomicBool,
    /// Time of connection creation
    pub created_at: Instant,
    rate_window_start: AtomicU64,
    rate_count: AtomicU32,
    packets_received: AtomicU64,
    character: RwLock<Option<Arc<Character>>>,
    creation: RwLock<Option<CreationTicket>>,
}

impl Connection {
    /// Get the current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Set the connection state
    pub fn set_state(&self, new_state: ConnectionState) {
        let old_state = {
            let mut state = self.state.write();
            let old = *state;
            *state = new_state;
            old
        };
        debug!(
            connection_id = self.id,
            old_state = %old_state,
            new_state = %new_state,
            "Connection state changed"
        );
    }

    /// Transition to a new state if currently in the expected state
    pub fn transition_state(&self, expected: ConnectionState, new_state: ConnectionState) -> bool {
        let mut state = self.state.write();
        if *state == expected {
            *state = new_state;
            true
        } else {
            false
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    pub fn is_disconnected(&self) -> bool {
        self.state() == ConnectionState::Disconnected || self.close.is_cancelled()
    }

    // ============ Handshake ============

    /// Store the handshake while the exchange is pending
    pub fn set_handshake(&self, handshake: Handshake) {
        *self.handshake.lock() = Some(handshake);
    }

    /// Take the pending handshake out of the connection
    pub fn take_handshake(&self) -> Option<Handshake> {
        self.handshake.lock().take()
    }

    /// Activate the derived ciphers
    ///
    /// The outbound half is handed to the writer task through the outbound
    /// queue so it applies to every frame queued after this call. The inbound
    /// half is parked until the read loop takes it.
    pub async fn activate(&self, ciphers: CipherPair) -> Result<()> {
        let (encrypt, decrypt) = ciphers.split();
        self.outbound
            .send(Outbound::StartEncryption(encrypt))
            .await
            .map_err(|_| TransportError::OutboundClosed)?;
        *self.decryptor.lock() = Some(decrypt);
        self.transition_state(ConnectionState::Exchanging, ConnectionState::Active);
        Ok(())
    }

    /// Take the inbound keystream (read loop only)
    pub fn take_decryptor(&self) -> Option<CipherStream> {
        self.decryptor.lock().take()
    }

    // ============ Outbound ============

    /// Queue an encoded frame without waiting
    ///
    /// A full queue means the client stopped reading; the connection is
    /// closed so no partition worker ever waits on a slow socket.
    pub fn send(&self, frame: Bytes) -> Result<()> {
        match self.outbound.try_send(Outbound::Frame(frame)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(
                    connection_id = self.id,
                    address = %self.address,
                    "Outbound queue full, disconnecting slow client"
                );
                self.disconnect();
                Err(TransportError::OutboundFull.into())
            }
            Err(TrySendError::Closed(_)) => Err(TransportError::OutboundClosed.into()),
        }
    }

    /// Encode and queue a message
    pub fn send_packet<P: Packet>(&self, packet: &P) -> Result<()> {
        self.send(packet.encode())
    }

    /// Queue a clear-text frame
    pub async fn send_raw(&self, frame: Bytes) -> Result<()> {
        self.outbound
            .send(Outbound::Raw(frame))
            .await
            .map_err(|_| TransportError::OutboundClosed.into())
    }

    // ============ Teardown ============

    /// Request the connection to close
    pub fn disconnect(&self) {
        if !self.close.is_cancelled() {
            debug!(connection_id = self.id, address = %self.address, "Disconnect requested");
            self.close.cancel();
        }
    }

    /// Token cancelled when the connection closes
    pub fn close_token(&self) -> &CancellationToken {
        &self.close
    }

    /// Claim the single disconnect notification; true only for the first caller
    pub fn claim_disconnect(&self) -> bool {
        !self.disconnect_notified.swap(true, Ordering::AcqRel)
    }

    // ============ Rate limiting ============

    /// Count a received frame against the current rate window
    ///
    /// Returns the number of frames seen in the window when it exceeds
    /// `max_per_second`. Called only from the connection's read loop.
    pub fn check_rate(&self, max_per_second: u32) -> std::result::Result<(), u32> {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        let now = self.created_at.elapsed().as_millis() as u64;
        let start = self.rate_window_start.load(Ordering::Relaxed);
        if now.saturating_sub(start) >= RATE_WINDOW_MS {
            self.rate_window_start.store(now, Ordering::Relaxed);
            self.rate_count.store(1, Ordering::Relaxed);
            return Ok(());
        }
        let count = self.rate_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count > max_per_second {
            Err(count)
        } else {
            Ok(())
        }
    }

    /// Total frames received
    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    // ============ Game binding ============

    /// Character bound to this connection
    pub fn character(&self) -> Option<Arc<Character>> {
        self.character.read().clone()
    }

    pub fn set_character(&self, character: Option<Arc<Character>>) {
        *self.character.write() = character;
    }

    /// Pending character creation ticket
    pub fn creation(&self) -> Option<CreationTicket> {
        self.creation.read().clone()
    }

    pub fn set_creation(&self, ticket: Option<CreationTicket>) {
        *self.creation.write() = ticket;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("guid", &self.guid)
            .field("address", &self.address)
            .field("partition", &self.partition)
            .field("state", &self.state())
            .finish()
    }
}
