//! MsgTalk (1004)
//!
//! Chat and system notices. The server uses it for login and registration
//! answers and for diagnostics sent to privileged sessions.

use bytes::Bytes;

use super::packets::{read_typed_header, Packet, PacketType};
use crate::error::DecodeError;
use crate::net::buffer::PacketWriter;

/// Sender name used for server generated messages
pub const SYSTEM: &str = "SYSTEM";

/// Recipient name used for broadcast messages
pub const ALL_USERS: &str = "ALLUSERS";

/// Default message color (white)
pub const DEFAULT_COLOR: u32 = 0x00FF_FFFF;

wire_enum! {
    /// Chat channels
    pub enum TalkChannel {
        Talk = 2000,
        Whisper = 2001,
        Action = 2002,
        Team = 2003,
        Guild = 2004,
        Family = 2006,
        System = 2007,
        Yelling = 2008,
        Friend = 2009,
        Center = 2011,
        TopLeft = 2012,
        Ghost = 2013,
        Service = 2014,
        Tip = 2015,
        World = 2021,
        Register = 2100,
        Login = 2101,
        Shop = 2102,
        Vendor = 2104,
        Website = 2105,
    }
}

impl TalkChannel {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// MsgTalk message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgTalk {
    pub color: u32,
    /// Raw channel; see [`MsgTalk::channel_type`]
    pub channel: u16,
    pub style: u16,
    pub identity: u32,
    pub recipient_mesh: u32,
    pub sender_mesh: u32,
    pub sender: String,
    pub recipient: String,
    pub suffix: String,
    pub message: String,
}

impl MsgTalk {
    /// Create a system message for the given channel
    pub fn new(identity: u32, channel: TalkChannel, message: impl Into<String>) -> Self {
        Self {
            color: DEFAULT_COLOR,
            channel: channel.as_u16(),
            style: 0,
            identity,
            recipient_mesh: 0,
            sender_mesh: 0,
            sender: SYSTEM.to_string(),
            recipient: ALL_USERS.to_string(),
            suffix: String::new(),
            message: message.into(),
        }
    }

    /// Typed channel, if known
    pub fn channel_type(&self) -> Option<TalkChannel> {
        TalkChannel::from_u16(self.channel)
    }

    pub fn login_ok() -> Self {
        Self::new(0, TalkChannel::Login, "ANSWER_OK")
    }

    pub fn login_invalid() -> Self {
        Self::new(0, TalkChannel::Login, "Invalid login")
    }

    /// Sent when the account has no character yet
    pub fn login_new_role() -> Self {
        Self::new(0, TalkChannel::Login, "NEW_ROLE")
    }

    pub fn login_already_online() -> Self {
        Self::new(0, TalkChannel::Login, "Character is already logged in")
    }

    pub fn register_ok() -> Self {
        Self::new(0, TalkChannel::Register, "ANSWER_OK")
    }

    pub fn register_invalid() -> Self {
        Self::new(0, TalkChannel::Register, "Invalid character")
    }

    pub fn register_name_taken() -> Self {
        Self::new(0, TalkChannel::Register, "Character name taken")
    }

    pub fn register_try_again() -> Self {
        Self::new(0, TalkChannel::Register, "Error, please try later")
    }
}

impl Packet for MsgTalk {
    const TYPE: PacketType = PacketType::MsgTalk;

    fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = read_typed_header(frame, Self::TYPE)?;
        let color = reader.read_u32("color")?;
        let channel = reader.read_u16("channel")?;
        let style = reader.read_u16("style")?;
        let identity = reader.read_u32("identity")?;
        let recipient_mesh = reader.read_u32("recipient_mesh")?;
        let sender_mesh = reader.read_u32("sender_mesh")?;
        let mut strings = reader.read_strings("strings")?.into_iter();

        Ok(Self {
            color,
            channel,
            style,
            identity,
            recipient_mesh,
            sender_mesh,
            sender: strings.next().unwrap_or_default(),
            recipient: strings.next().unwrap_or_default(),
            suffix: strings.next().unwrap_or_default(),
            message: strings.next().unwrap_or_default(),
        })
    }

    fn encode(&self) -> Bytes {
        let mut writer = PacketWriter::with_capacity(
            24 + self.sender.len() + self.recipient.len() + self.suffix.len() + self.message.len(),
        );
        writer
            .write_u32(self.color)
            .write_u16(self.channel)
            .write_u16(self.style)
            .write_u32(self.identity)
            .write_u32(self.recipient_mesh)
            .write_u32(self.sender_mesh)
            .write_strings(&[
                self.sender.as_str(),
                self.recipient.as_str(),
                self.suffix.as_str(),
                self.message.as_str(),
            ]);
        writer.finish(Self::TYPE.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_roundtrip() {
        let mut msg = MsgTalk::new(42, TalkChannel::Service, "Missing packet 4242, Length 12");
        msg.sender_mesh = 1003;
        let decoded = MsgTalk::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.channel_type(), Some(TalkChannel::Service));
    }

    #[test]
    fn test_missing_strings_default_to_empty() {
        let mut writer = PacketWriter::new();
        writer
            .write_u32(DEFAULT_COLOR)
            .write_u16(TalkChannel::Talk.as_u16())
            .write_u16(0)
            .write_u32(1)
            .write_u32(0)
            .write_u32(0)
            .write_strings(&["alice", "bob"]);
        let frame = writer.finish(PacketType::MsgTalk.as_u16());

        let msg = MsgTalk::decode(&frame).unwrap();
        assert_eq!(msg.sender, "alice");
        assert_eq!(msg.recipient, "bob");
        assert_eq!(msg.message, "");
    }

    #[test]
    fn test_canned_answers() {
        assert_eq!(MsgTalk::register_ok().message, "ANSWER_OK");
        assert_eq!(
            MsgTalk::register_ok().channel_type(),
            Some(TalkChannel::Register)
        );
        assert_eq!(MsgTalk::login_new_role().message, "NEW_ROLE");
    }
}
