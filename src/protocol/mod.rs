//! Protocol module
//!
//! This module contains the message types of the Embergate game protocol:
//! - Packet type table, frame header and the [`packets::Packet`] trait
//! - Key exchange messages and the per-connection handshake state machine
//! - Game messages (MsgAction, MsgTalk, MsgConnect, MsgRegister)

/// Defines a `u16` wire enum with lookup by value and a name table.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $enum:ident {
            $($name:ident = $value:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        $vis enum $enum {
            $($name = $value),+
        }

        impl $enum {
            /// Look up a value from its wire representation
            pub fn from_u16(value: u16) -> Option<Self> {
                match value {
                    $($value => Some($enum::$name),)+
                    _ => None,
                }
            }

            /// Get the variant name
            pub fn name(&self) -> &'static str {
                match self {
                    $($enum::$name => stringify!($name)),+
                }
            }
        }
    };
}

pub mod action;
pub mod connect;
pub mod handshake;
pub mod packets;
pub mod register;
pub mod talk;

pub use action::{ActionType, MsgAction};
pub use connect::MsgConnect;
pub use handshake::{Handshake, HandshakeOffer, HandshakePhase, HandshakeReply};
pub use packets::{FrameHeader, Packet, PacketType};
pub use register::MsgRegister;
pub use talk::{MsgTalk, TalkChannel};
