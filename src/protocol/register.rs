//! MsgRegister (1001)
//!
//! Character creation request: account name, new character name, body mesh
//! and profession, plus the creation token handed out at login.

use bytes::Bytes;

use super::packets::{read_typed_header, Packet, PacketType};
use crate::error::DecodeError;
use crate::net::buffer::PacketWriter;

/// Length of the fixed name fields
pub const NAME_LENGTH: usize = 16;

/// MsgRegister message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MsgRegister {
    pub username: String,
    pub character_name: String,
    pub mesh: u16,
    pub class: u16,
    pub token: u32,
}

impl Packet for MsgRegister {
    const TYPE: PacketType = PacketType::MsgRegister;

    fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = read_typed_header(frame, Self::TYPE)?;
        let username = reader.read_fixed_string(NAME_LENGTH, "username")?;
        let character_name = reader.read_fixed_string(NAME_LENGTH, "character_name")?;
        reader.skip(NAME_LENGTH, "reserved")?;
        Ok(Self {
            username,
            character_name,
            mesh: reader.read_u16("mesh")?,
            class: reader.read_u16("class")?,
            token: reader.read_u32("token")?,
        })
    }

    fn encode(&self) -> Bytes {
        let mut writer = PacketWriter::with_capacity(56);
        writer
            .write_fixed_string(&self.username, NAME_LENGTH)
            .write_fixed_string(&self.character_name, NAME_LENGTH)
            .write_zeros(NAME_LENGTH)
            .write_u16(self.mesh)
            .write_u16(self.class)
            .write_u32(self.token);
        writer.finish(Self::TYPE.as_u16())
    }
}
