//! Error handling module
//!
//! Defines the error types for the Embergate server. Codec failures are kept in
//! their own [`DecodeError`] so the dispatch loop can log and drop a single
//! frame without tearing the connection down.

use std::io;

use thiserror::Error;

/// Main error type for the Embergate server
#[derive(Error, Debug)]
pub enum ServerError {
    /// Socket and framing errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Protocol-related errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Key exchange errors
    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// A work item or message handler failed
    #[error("Handler error: {0}")]
    Handler(String),

    /// Work was submitted to a partition that does not exist
    #[error("Partition {partition} is out of range (count: {count})")]
    Capacity { partition: u32, count: u32 },

    /// The processor no longer accepts work
    #[error("Processor is shutting down")]
    ShuttingDown,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Transport-specific errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Too many connections (max: {0})")]
    TooManyConnections(usize),

    #[error("Outbound queue closed")]
    OutboundClosed,

    #[error("Outbound queue full")]
    OutboundFull,

    #[error("Invalid frame length: {length} (min: {min}, max: {max})")]
    InvalidFrameLength { length: usize, min: usize, max: usize },
}

/// Protocol-specific errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Frame received before the key exchange completed")]
    NotExchanged,

    #[error("Rate limit exceeded: {count} packets in the current window")]
    RateLimited { count: u32 },
}

/// Key exchange errors
#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("Key exchange rejected")]
    Rejected,

    #[error("Peer public key is out of range")]
    InvalidPublicKey,

    #[error("Handshake is in phase {actual}, expected {expected}")]
    InvalidPhase {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Randomness unavailable: {0}")]
    Randomness(String),
}

/// Binary codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Unknown packet type: {0}")]
    UnknownType(u16),

    #[error("Unexpected packet type: expected {expected}, got {actual}")]
    UnexpectedType { expected: u16, actual: u16 },

    #[error("Truncated field `{field}`: needed {needed} bytes, {available} available")]
    TruncatedField {
        field: &'static str,
        needed: usize,
        available: usize,
    },
}

impl From<DecodeError> for ServerError {
    fn from(err: DecodeError) -> Self {
        ServerError::Protocol(ProtocolError::Decode(err))
    }
}

/// Result type alias for Embergate operations
pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransportError::ConnectionClosed;
        assert_eq!(err.to_string(), "Connection closed");

        let err = ServerError::Capacity {
            partition: 9,
            count: 4,
        };
        assert_eq!(err.to_string(), "Partition 9 is out of range (count: 4)");

        let err = DecodeError::TruncatedField {
            field: "identity",
            needed: 4,
            available: 1,
        };
        assert_eq!(
            err.to_string(),
            "Truncated field `identity`: needed 4 bytes, 1 available"
        );
    }

    #[test]
    fn test_decode_error_wraps_into_protocol() {
        let err: ServerError = DecodeError::UnknownType(4242).into();
        assert!(matches!(
            err,
            ServerError::Protocol(ProtocolError::Decode(DecodeError::UnknownType(4242)))
        ));
    }
}
