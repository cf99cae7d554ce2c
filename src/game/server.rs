//! Game server
//!
//! [`GameServer`] plugs the game layer into the TCP listener. Each connection
//! is bound to a packet processor partition at accept and keeps it until
//! disconnect. Frames are decoded on that partition; once the character is on
//! a map, its messages move to the map's world partition.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, error, info, warn};

use super::entity::{Character, MapEnterable, Sendable};
use crate::error::{DecodeError, ProtocolError, Result};
use crate::logging::LogLevel;
use crate::net::{Connection, ConnectionHooks, ConnectionId, ConnectionState, PendingConnection};
use crate::protocol::{FrameHeader, Handshake, HandshakeReply, MsgTalk, Packet, TalkChannel};
use crate::state::ServerState;

/// Connection hooks for the game server
#[derive(Clone)]
pub struct GameServer {
    state: Arc<ServerState>,
}

impl GameServer {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Start the key exchange for a freshly bound connection
    async fn start_exchange(&self, connection: &Arc<Connection>) -> Result<()> {
        let mut handshake = Handshake::new();
        let offer = handshake.initiate(self.state.randomness.as_ref()).await?;
        connection.set_handshake(handshake);
        connection.set_state(ConnectionState::Exchanging);
        connection.send_raw(offer.encode()).await
    }
}

#[async_trait]
impl ConnectionHooks for GameServer {
    async fn accepted(&self, pending: PendingConnection) -> Result<Arc<Connection>> {
        let partition = self.state.packet_processor.select_partition();
        let connection = Arc::new(pending.into_connection(partition));

        if let Err(e) = self.start_exchange(&connection).await {
            self.state.packet_processor.deselect_partition(partition);
            connection.take_handshake();
            return Err(e);
        }
        debug!(connection_id = connection.id, partition, "Key exchange offered");
        Ok(connection)
    }

    async fn exchanged(&self, connection: &Arc<Connection>, frame: Bytes) -> bool {
        let Some(mut handshake) = connection.take_handshake() else {
            warn!(connection_id = connection.id, "No key exchange pending");
            return false;
        };

        let reply = match HandshakeReply::decode(&frame) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(connection_id = connection.id, error = %e, "Malformed key exchange reply");
                handshake.close();
                return false;
            }
        };

        let ciphers = match handshake.complete(&reply) {
            Ok(ciphers) => ciphers,
            Err(e) => {
                warn!(connection_id = connection.id, error = %e, "Key exchange failed");
                return false;
            }
        };

        if let Err(e) = connection.activate(ciphers).await {
            debug!(connection_id = connection.id, error = %e, "Connection closed during key exchange");
            handshake.close();
            return false;
        }
        match handshake.activate() {
            Ok(()) => {
                debug!(connection_id = connection.id, phase = %handshake.phase(), "Cipher active");
                true
            }
            Err(e) => {
                warn!(connection_id = connection.id, error = %e, "Key exchange out of order");
                false
            }
        }
    }

    fn received(&self, connection: &Arc<Connection>, frame: Bytes) {
        if let Err(count) = connection.check_rate(self.state.config.max_packets_per_second) {
            warn!(
                connection_id = connection.id,
                error = %ProtocolError::RateLimited { count },
                max = self.state.config.max_packets_per_second,
                "Frame dropped"
            );
            return;
        }

        let state = self.state.clone();
        let owner = connection.clone();
        let queued = self
            .state
            .packet_processor
            .queue_future(connection.partition, async move { process(state, owner, frame).await });
        if let Err(e) = queued {
            debug!(connection_id = connection.id, error = %e, "Frame not queued");
        }
    }

    async fn disconnected(&self, connection: &Arc<Connection>) {
        self.state
            .packet_processor
            .deselect_partition(connection.partition);

        if let Some(ticket) = connection.creation() {
            self.state.registrations.remove(&ticket.token);
        }

        let Some(character) = connection.character() else {
            return;
        };
        let partition = self.state.maps.partition_of(character.current_map());
        let state = self.state.clone();
        let connection_id = connection.id;
        let queued = self.state.world_processor.queue_future(partition, async move {
            logout(&state, &character, connection_id).await
        });
        if let Err(e) = queued {
            error!(connection_id, error = %e, "Failed to queue logout");
        }
    }
}

/// Decode and dispatch one received frame
pub async fn process(state: Arc<ServerState>, connection: Arc<Connection>, frame: Bytes) -> Result<()> {
    if connection.is_disconnected() {
        return Ok(());
    }

    let handler = match state.registry.decode(&frame) {
        Ok(handler) => handler,
        Err(DecodeError::UnknownType(packet_type)) => {
            report_missing(&state, &connection, packet_type, &frame).await;
            return Ok(());
        }
        Err(e) => {
            warn!(
                connection_id = connection.id,
                length = frame.len(),
                error = %e,
                "Dropping undecodable frame"
            );
            return Ok(());
        }
    };

    let on_map = connection
        .character()
        .and_then(|c| c.current_map().map(|map_id| (c, map_id)));
    let Some((character, map_id)) = on_map else {
        return handler.process(&state, &connection).await;
    };

    let owns_identity = state
        .roles
        .get_user(character.identity())
        .map(|registered| registered.connection_id() == connection.id);
    if owns_identity != Some(true) {
        warn!(
            connection_id = connection.id,
            identity = character.identity(),
            "Identity is registered to another connection, disconnecting"
        );
        connection.disconnect();
        if owns_identity.is_some() {
            state.roles.kick_out(character.identity(), "duplicate identity");
        }
        return Ok(());
    }

    let partition = state.maps.partition_of(Some(map_id));
    let world_state = state.clone();
    state.world_processor.queue_future(partition, async move {
        handler.process(&world_state, &connection).await
    })
}

/// Log an unknown message and tell privileged characters about it
async fn report_missing(state: &ServerState, connection: &Connection, packet_type: u16, frame: &[u8]) {
    let length = FrameHeader::parse(frame).map(|h| h.length).unwrap_or(0);
    let notice = format!("Missing packet {}, Length {}", packet_type, length);
    warn!(
        connection_id = connection.id,
        packet_type,
        length,
        dump = %hex::encode(frame),
        "Missing packet"
    );
    state.log_sink.write(LogLevel::Warn, notice.clone());

    if let Some(character) = connection.character() {
        if character.is_privileged() {
            let talk = MsgTalk::new(character.identity(), TalkChannel::Service, notice);
            if let Err(e) = character.send_packet(&talk).await {
                debug!(connection_id = connection.id, error = %e, "Diagnostic not delivered");
            }
        }
    }
}

/// Remove a character from the world and save it
pub(crate) async fn logout(state: &ServerState, character: &Arc<Character>, connection_id: ConnectionId) -> Result<()> {
    if let Some(map_id) = character.leave_map() {
        if let Some(map) = state.maps.get(map_id) {
            map.leave(character.identity());
        }
    }

    if state
        .roles
        .force_logout(character.identity(), connection_id)
        .is_none()
    {
        debug!(identity = character.identity(), "Character was already unregistered");
    }

    state.repository.save(&character.to_record()).await?;
    info!(identity = character.identity(), name = %character.name(), "Character saved");
    Ok(())
}
