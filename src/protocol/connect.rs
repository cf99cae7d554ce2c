//! MsgConnect (1052)
//!
//! First message sent by the client after the key exchange. Carries the login
//! ticket issued by the account server.

use bytes::Bytes;

use super::packets::{read_typed_header, Packet, PacketType};
use crate::error::DecodeError;
use crate::net::buffer::PacketWriter;

/// MsgConnect message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MsgConnect {
    /// Login ticket token
    pub token: u32,
    /// Login ticket code
    pub code: u32,
    pub client_version: u16,
    /// Two letter language code
    pub language: String,
    pub file_checksum: u32,
}

impl Packet for MsgConnect {
    const TYPE: PacketType = PacketType::MsgConnect;

    fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = read_typed_header(frame, Self::TYPE)?;
        Ok(Self {
            token: reader.read_u32("token")?,
            code: reader.read_u32("code")?,
            client_version: reader.read_u16("client_version")?,
            language: reader.read_fixed_string(2, "language")?,
            file_checksum: reader.read_u32("file_checksum")?,
        })
    }

    fn encode(&self) -> Bytes {
        let mut writer = PacketWriter::with_capacity(16);
        writer
            .write_u32(self.token)
            .write_u32(self.code)
            .write_u16(self.client_version)
            .write_fixed_string(&self.language, 2)
            .write_u32(self.file_checksum);
        writer.finish(Self::TYPE.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_roundtrip() {
        let msg = MsgConnect {
            token: 0xDEAD_BEEF,
            code: 77,
            client_version: 5180,
            language: "En".to_string(),
            file_checksum: 0x1234_5678,
        };
        let frame = msg.encode();
        assert_eq!(frame.len(), 20);
        assert_eq!(MsgConnect::decode(&frame).unwrap(), msg);
    }
}
