//! Message handlers
//!
//! Processing for every message in the default [`PacketRegistry`]:
//! - `MsgConnect`: redeem the login ticket, then log in or start creation
//! - `MsgRegister`: validate and store a new character
//! - `MsgAction`: spawn, map jumps and echo of unhandled actions
//! - `MsgTalk`: chat routing
//!
//! [`PacketRegistry`]: super::dispatch::PacketRegistry

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::dispatch::MessageHandler;
use super::entity::{Character, CreationTicket, MapEnterable, Positionable, Sendable};
use super::persistence::CharacterRecord;
use super::server::logout;
use crate::error::Result;
use crate::logging::LogLevel;
use crate::net::Connection;
use crate::protocol::action::MSG_ACTION_SIZE;
use crate::protocol::{ActionType, MsgAction, MsgConnect, MsgRegister, MsgTalk, Packet, PacketType, TalkChannel};
use crate::state::ServerState;

/// Body meshes accepted at character creation
const BODY_TYPES: [u16; 4] = [1003, 1004, 2001, 2002];

/// Base professions accepted at character creation
const BASE_CLASSES: [u16; 5] = [10, 20, 40, 50, 100];

/// Profession closed for creation
const CLASS_NINJA: u16 = 50;

/// Characters never allowed in a name
const FORBIDDEN_CHARS: &str = " ;,/\\=%@'\"[]?{}";

/// Substrings never allowed in a name (compared lowercase)
const FORBIDDEN_PARTS: [&str; 25] = [
    "{", "}", "[", "]", "(", ")", "\"", "[gm]", "[pm]", "'", "`", "admin", "helpdesk", " ", "bitch",
    "puta", "whore", "ass", "fuck", "cunt", "fdp", "porra", "poha", "caralho", "caraio",
];

/// Whether a character name is acceptable
pub fn is_valid_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    if name.chars().any(|c| c < ' ' || FORBIDDEN_CHARS.contains(c)) {
        return false;
    }
    let lower = name.to_lowercase();
    !FORBIDDEN_PARTS.iter().any(|part| lower.contains(part))
}

#[async_trait]
impl MessageHandler for MsgConnect {
    fn packet_type(&self) -> PacketType {
        Self::TYPE
    }

    async fn process(&self, state: &Arc<ServerState>, connection: &Arc<Connection>) -> Result<()> {
        let Some(ticket) = state.redeem_login_ticket(self.token, self.code) else {
            warn!(
                connection_id = connection.id,
                address = %connection.address,
                token = self.token,
                "Invalid login ticket"
            );
            connection.send_packet(&MsgTalk::login_invalid())?;
            connection.disconnect();
            return Ok(());
        };

        let Some(record) = state.repository.find_by_account(ticket.account_id).await? else {
            // No character yet; the client answers with MsgRegister.
            state.registrations.insert(self.token);
            connection.set_creation(Some(CreationTicket {
                account_id: ticket.account_id,
                token: self.token,
            }));
            if connection.is_disconnected() {
                // The disconnect hook may have run before the ticket was bound.
                state.registrations.remove(&self.token);
                connection.set_creation(None);
                return Ok(());
            }
            debug!(
                connection_id = connection.id,
                account_id = ticket.account_id,
                "Account has no character, awaiting creation"
            );
            return connection.send_packet(&MsgTalk::login_new_role());
        };

        let identity = record.identity;
        let character = Arc::new(Character::from_record(record, connection));
        if state.roles.login(character.clone()).is_err() {
            warn!(
                connection_id = connection.id,
                identity,
                "Character is already online, disconnecting both sessions"
            );
            connection.send_packet(&MsgTalk::login_already_online())?;
            connection.disconnect();
            state.roles.kick_out(identity, "logged in from another connection");
            return Ok(());
        }

        connection.set_character(Some(character.clone()));
        if connection.is_disconnected() {
            // The peer left while the character was loading, possibly before
            // the disconnect hook could see it.
            debug!(connection_id = connection.id, identity, "Connection closed during login");
            return logout(state, &character, connection.id).await;
        }
        connection.send_packet(&MsgTalk::login_ok())?;
        info!(
            connection_id = connection.id,
            identity,
            name = %character.name(),
            "Character logged in"
        );
        state
            .log_sink
            .write(LogLevel::Info, format!("{} has logged in", character.name()));
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for MsgRegister {
    fn packet_type(&self) -> PacketType {
        Self::TYPE
    }

    async fn process(&self, state: &Arc<ServerState>, connection: &Arc<Connection>) -> Result<()> {
        let creation = connection
            .creation()
            .filter(|ticket| ticket.token == self.token && state.registrations.contains(&self.token));
        let Some(creation) = creation else {
            warn!(connection_id = connection.id, token = self.token, "Registration without a valid creation ticket");
            connection.send_packet(&MsgTalk::register_invalid())?;
            connection.disconnect();
            return Ok(());
        };

        if state.repository.exists(&self.character_name).await? {
            return connection.send_packet(&MsgTalk::register_name_taken());
        }

        if !BODY_TYPES.contains(&self.mesh)
            || !BASE_CLASSES.contains(&self.class)
            || self.class == CLASS_NINJA
            || !is_valid_name(&self.character_name)
        {
            debug!(
                connection_id = connection.id,
                mesh = self.mesh,
                class = self.class,
                name = %self.character_name,
                "Rejected character creation"
            );
            return connection.send_packet(&MsgTalk::register_invalid());
        }

        let record = CharacterRecord::new(creation.account_id, self.character_name.clone(), self.mesh, self.class);
        match state.repository.create(record).await {
            Ok(created) => {
                state.registrations.remove(&creation.token);
                connection.set_creation(None);
                info!(
                    connection_id = connection.id,
                    account_id = creation.account_id,
                    identity = created.identity,
                    name = %created.name,
                    "Character created"
                );
                connection.send_packet(&MsgTalk::register_ok())
            }
            Err(e) => {
                warn!(connection_id = connection.id, error = %e, "Character creation failed");
                connection.send_packet(&MsgTalk::register_try_again())
            }
        }
    }
}

#[async_trait]
impl MessageHandler for MsgAction {
    fn packet_type(&self) -> PacketType {
        Self::TYPE
    }

    async fn process(&self, state: &Arc<ServerState>, connection: &Arc<Connection>) -> Result<()> {
        let Some(character) = connection.character() else {
            debug!(connection_id = connection.id, action = self.action, "Action before login ignored");
            return Ok(());
        };

        let mut reply = self.clone();
        match self.action_type() {
            Some(ActionType::LoginSpawn) => {
                reply.identity = character.identity();
                let Some(map) = state.maps.get(character.map_id()) else {
                    warn!(
                        identity = character.identity(),
                        map_id = character.map_id(),
                        "Character saved on an unknown map"
                    );
                    connection.disconnect();
                    return Ok(());
                };
                let (x, y) = character.position();
                reply.command = map.doc;
                reply.x = x;
                reply.y = y;
                map.enter(character.identity());
                character.enter_map(map.id);
                character.send_packet(&reply).await
            }
            Some(ActionType::LoginComplete) => character.send_packet(&reply).await,
            Some(ActionType::MapJump) => {
                let (x, y) = (self.command_x(), self.command_y());
                character.set_position(character.map_id(), x, y);
                reply.identity = character.identity();
                reply.x = x;
                reply.y = y;
                character.send_packet(&reply).await
            }
            _ => {
                character.send_packet(&reply).await?;
                let notice = format!(
                    "Missing packet {}, Action {}, Length {}",
                    Self::TYPE.as_u16(),
                    self.action,
                    MSG_ACTION_SIZE
                );
                debug!(dump = %hex::encode(self.encode()), "{}", notice);
                character
                    .send_packet(&MsgTalk::new(character.identity(), TalkChannel::Service, notice))
                    .await
            }
        }
    }
}

#[async_trait]
impl MessageHandler for MsgTalk {
    fn packet_type(&self) -> PacketType {
        Self::TYPE
    }

    async fn process(&self, state: &Arc<ServerState>, connection: &Arc<Connection>) -> Result<()> {
        let Some(character) = connection.character() else {
            return Ok(());
        };

        let mut message = self.clone();
        message.identity = character.identity();
        message.sender = character.name().to_string();
        info!(
            identity = character.identity(),
            channel = self.channel,
            recipient = %self.recipient,
            "{}: {}",
            character.name(),
            self.message
        );

        match self.channel_type() {
            Some(TalkChannel::Whisper) => match state.roles.find_by_name(&self.recipient) {
                Some(target) => target.send_packet(&message).await,
                None => {
                    let notice = format!("{} is not online", self.recipient);
                    character
                        .send_packet(&MsgTalk::new(character.identity(), TalkChannel::Talk, notice))
                        .await
                }
            },
            Some(TalkChannel::Talk) => {
                let Some(map) = character.current_map().and_then(|id| state.maps.get(id)) else {
                    return character.send_packet(&message).await;
                };
                for identity in map.players() {
                    if let Some(target) = state.roles.get_user(identity) {
                        if let Err(e) = target.send_packet(&message).await {
                            debug!(identity, error = %e, "Chat delivery failed");
                        }
                    }
                }
                Ok(())
            }
            _ => character.send_packet(&message).await,
        }
    }
}
