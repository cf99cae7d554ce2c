//! MsgAction (10010)
//!
//! General purpose action message. The action subtype selects the meaning of
//! the `command` and `argument` fields, which some actions split into two
//! 16-bit halves (X in the low half, Y in the high half).

use bytes::Bytes;

use super::packets::{read_typed_header, Packet, PacketType};
use crate::error::DecodeError;
use crate::net::buffer::PacketWriter;

/// Encoded size of a MsgAction frame
pub const MSG_ACTION_SIZE: usize = 36;

wire_enum! {
    /// Action subtypes requested by the client or issued by the server
    pub enum ActionType {
        LoginSpawn = 74,
        LoginInventory = 75,
        LoginRelationships = 76,
        LoginProficiencies = 77,
        LoginSpells = 78,
        CharacterDirection = 79,
        CharacterEmote = 81,
        MapPortal = 85,
        MapTeleport = 86,
        CharacterLevelUp = 92,
        SpellAbortXp = 93,
        CharacterRevive = 94,
        CharacterDelete = 95,
        CharacterPkMode = 96,
        LoginGuild = 97,
        MapMine = 99,
        MapTeamLeaderStar = 101,
        MapQuery = 102,
        AbortMagic = 103,
        MapArgb = 104,
        MapTeamMemberStar = 106,
        Kickback = 108,
        SpellRemove = 109,
        ProficiencyRemove = 110,
        BoothSpawn = 111,
        BoothSuspend = 112,
        BoothResume = 113,
        BoothLeave = 114,
        ClientCommand = 116,
        CharacterObservation = 117,
        SpellAbortTransform = 118,
        SpellAbortFlight = 120,
        MapGold = 121,
        RelationshipsEnemy = 123,
        ClientDialog = 126,
        LoginComplete = 132,
        MapEffect = 134,
        RemoveEntity = 135,
        MapJump = 137,
        QueryTradeBuddy = 143,
        CharacterDead = 145,
        RelationshipsFriend = 148,
        CharacterAvatar = 151,
        ItemDetained = 153,
        ItemDetainedEx = 155,
        NinjaStep = 156,
        Away = 161,
        FriendObservation = 310,
    }
}

/// MsgAction message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MsgAction {
    pub identity: u32,
    pub command: u32,
    pub argument: u32,
    pub timestamp: u32,
    /// Raw action subtype; see [`MsgAction::action_type`]
    pub action: u16,
    pub direction: u16,
    pub x: u16,
    pub y: u16,
    pub map: u32,
    pub color: u32,
}

impl MsgAction {
    /// Create an action for an identity, stamped with the current time
    pub fn new(identity: u32, action: ActionType) -> Self {
        Self {
            identity,
            action: action.as_u16(),
            timestamp: chrono::Utc::now().timestamp_millis() as u32,
            ..Default::default()
        }
    }

    /// Typed action subtype, if known
    pub fn action_type(&self) -> Option<ActionType> {
        ActionType::from_u16(self.action)
    }

    #[inline]
    pub fn command_x(&self) -> u16 {
        low(self.command)
    }

    #[inline]
    pub fn command_y(&self) -> u16 {
        high(self.command)
    }

    /// Set the low half of `command`, keeping the high half
    pub fn set_command_x(&mut self, value: u16) {
        self.command = with_low(self.command, value);
    }

    /// Set the high half of `command`, keeping the low half
    pub fn set_command_y(&mut self, value: u16) {
        self.command = with_high(self.command, value);
    }

    #[inline]
    pub fn argument_x(&self) -> u16 {
        low(self.argument)
    }

    #[inline]
    pub fn argument_y(&self) -> u16 {
        high(self.argument)
    }

    pub fn set_argument_x(&mut self, value: u16) {
        self.argument = with_low(self.argument, value);
    }

    pub fn set_argument_y(&mut self, value: u16) {
        self.argument = with_high(self.argument, value);
    }
}

impl ActionType {
    /// Get the wire value
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

#[inline]
fn low(value: u32) -> u16 {
    (value & 0xFFFF) as u16
}

#[inline]
fn high(value: u32) -> u16 {
    (value >> 16) as u16
}

#[inline]
fn with_low(value: u32, half: u16) -> u32 {
    (value & 0xFFFF_0000) | half as u32
}

#[inline]
fn with_high(value: u32, half: u16) -> u32 {
    (value & 0x0000_FFFF) | ((half as u32) << 16)
}

impl Packet for MsgAction {
    const TYPE: PacketType = PacketType::MsgAction;

    fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = read_typed_header(frame, Self::TYPE)?;
        Ok(Self {
            identity: reader.read_u32("identity")?,
            command: reader.read_u32("command")?,
            argument: reader.read_u32("argument")?,
            timestamp: reader.read_u32("timestamp")?,
            action: reader.read_u16("action")?,
            direction: reader.read_u16("direction")?,
            x: reader.read_u16("x")?,
            y: reader.read_u16("y")?,
            map: reader.read_u32("map")?,
            color: reader.read_u32("color")?,
        })
    }

    fn encode(&self) -> Bytes {
        let mut writer = PacketWriter::with_capacity(MSG_ACTION_SIZE);
        writer
            .write_u32(self.identity)
            .write_u32(self.command)
            .write_u32(self.argument)
            .write_u32(self.timestamp)
            .write_u16(self.action)
            .write_u16(self.direction)
            .write_u16(self.x)
            .write_u16(self.y)
            .write_u32(self.map)
            .write_u32(self.color);
        writer.finish(Self::TYPE.as_u16())
    }
}
