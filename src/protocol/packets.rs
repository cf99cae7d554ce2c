//! Packet definitions module
//!
//! Defines the packet type table and the [`Packet`] trait implemented by every
//! message that travels over a game connection. Every frame starts with a
//! little-endian `{u16 length, u16 type}` header; the type identifies the
//! message at offset 2 of every frame.

use std::fmt;

use bytes::Bytes;

use crate::error::DecodeError;
use crate::net::buffer::{PacketReader, HEADER_SIZE};

wire_enum! {
    /// Packet types of the game protocol
    pub enum PacketType {
        MsgRegister = 1001,
        MsgTalk = 1004,
        MsgUserInfo = 1006,
        MsgItemInfo = 1008,
        MsgItem = 1009,
        MsgTick = 1012,
        MsgName = 1015,
        MsgWeather = 1016,
        MsgFriend = 1019,
        MsgInteract = 1022,
        MsgTeam = 1023,
        MsgAllot = 1024,
        MsgWeaponSkill = 1025,
        MsgTeamMember = 1026,
        MsgGemEmbed = 1027,
        MsgFuse = 1028,
        MsgTeamAward = 1029,
        MsgGodExp = 1036,
        MsgPing = 1037,
        MsgEnemyList = 1041,
        MsgMonsterTransform = 1042,
        MsgTeamRoll = 1043,
        MsgLoadMap = 1044,
        MsgConnect = 1052,
        MsgConnectEx = 1055,
        MsgTrade = 1056,
        MsgSynpOffer = 1058,
        MsgHandshake = 1059,
        MsgAccount = 1086,
        MsgPcNum = 1100,
        MsgMapItem = 1101,
        MsgPackage = 1102,
        MsgMagicInfo = 1103,
        MsgFlushExp = 1104,
        MsgMagicEffect = 1105,
        MsgSyndicateAttributeInfo = 1106,
        MsgSyndicate = 1107,
        MsgItemInfoEx = 1108,
        MsgNpcInfoEx = 1109,
        MsgMapInfo = 1110,
        MsgMessageBoard = 1111,
        MsgDice = 1113,
        MsgSyncAction = 1114,
        MsgTitle = 1130,
        MsgTaskStatus = 1134,
        MsgTaskDetailInfo = 1135,
        MsgFamily = 1312,
        MsgFamilyOccupy = 1313,
        MsgNpcInfo = 2030,
        MsgNpc = 2031,
        MsgTaskDialog = 2032,
        MsgDataArray = 2036,
        MsgTradeBuddy = 2046,
        MsgTradeBuddyInfo = 2047,
        MsgEquipLock = 2048,
        MsgPigeon = 2050,
        MsgPigeonQuery = 2051,
        MsgPeerage = 2064,
        MsgGuide = 2065,
        MsgGuideInfo = 2066,
        MsgContribute = 2067,
        MsgQuiz = 2068,
        MsgTotemPoleInfo = 2201,
        MsgWeaponsInfo = 2202,
        MsgTotemPole = 2203,
        MsgQualifyingInteractive = 2205,
        MsgQualifyingFightersList = 2206,
        MsgQualifyingRank = 2207,
        MsgQualifyingSeasonRankList = 2208,
        MsgQualifyingDetailInfo = 2209,
        MsgArenicScore = 2210,
        MsgArenicWitness = 2211,
        MsgWalk = 10005,
        MsgAction = 10010,
        MsgPlayer = 10014,
        MsgUserAttrib = 10017,
    }
}

impl PacketType {
    /// Get the wire tag
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u16())
    }
}

/// A message of the game protocol
///
/// `decode` reads from a complete frame (header included, footer excluded) and
/// must never panic on short or malformed input. `encode` produces a complete
/// frame whose header carries the real length.
pub trait Packet: Sized + Send + Sync + 'static {
    /// The packet type tag
    const TYPE: PacketType;

    /// Decode the message from a frame
    fn decode(frame: &[u8]) -> Result<Self, DecodeError>;

    /// Encode the message to a frame
    fn encode(&self) -> Bytes;
}

/// Read a frame header and check that it carries the expected type
pub fn read_typed_header<'a>(
    frame: &'a [u8],
    expected: PacketType,
) -> Result<PacketReader<'a>, DecodeError> {
    let mut reader = PacketReader::new(frame);
    let (_, packet_type) = reader.read_header()?;
    if packet_type != expected.as_u16() {
        return Err(DecodeError::UnexpectedType {
            expected: expected.as_u16(),
            actual: packet_type,
        });
    }
    Ok(reader)
}

/// Header of a received frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Declared length (not trusted by decoders)
    pub length: u16,
    /// Raw type tag
    pub packet_type: u16,
}

impl FrameHeader {
    /// Parse the header of a frame
    pub fn parse(frame: &[u8]) -> Result<Self, DecodeError> {
        if frame.len() < HEADER_SIZE {
            return Err(DecodeError::MalformedFrame(format!(
                "frame of {} bytes has no header",
                frame.len()
            )));
        }
        Ok(Self {
            length: u16::from_le_bytes([frame[0], frame[1]]),
            packet_type: u16::from_le_bytes([frame[2], frame[3]]),
        })
    }

    /// Known packet type, if any
    pub fn known_type(&self) -> Option<PacketType> {
        PacketType::from_u16(self.packet_type)
    }
}
