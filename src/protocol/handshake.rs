//! Key exchange protocol
//!
//! Handles the handshake that runs before any application frame is accepted:
//! 1. The server draws a private exponent, two IVs and random padding, and
//!    sends a [`HandshakeOffer`] in clear text right after accept.
//! 2. The client answers with a [`HandshakeReply`] carrying its public value.
//! 3. Both sides derive one stream key per direction and switch to encrypted
//!    framing. The reply is the last clear-text frame on the connection.
//!
//! Ephemeral key material lives only inside [`Handshake`] and is dropped
//! (zeroed) as soon as the cipher has been derived.

use std::fmt;

use bytes::Bytes;
use zeroize::Zeroizing;

use super::packets::{read_typed_header, Packet, PacketType};
use crate::crypto::cipher::{CipherPair, CipherStream, IV_SIZE};
use crate::crypto::exchange::{derive_session_keys, DiffieHellman, PRIVATE_KEY_SIZE};
use crate::crypto::Randomness;
use crate::error::{DecodeError, HandshakeError, Result, ServerError};
use crate::net::buffer::PacketWriter;

/// Minimum length of the random padding in handshake messages
pub const MIN_PADDING: usize = 8;

/// Maximum length of the random padding in handshake messages
pub const MAX_PADDING: usize = 24;

/// Phase of a connection's key exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// Nothing sent yet
    New,
    /// Offer sent, waiting for the peer's public value
    KeyExchangePending,
    /// Stream keys derived and ephemeral material released, cipher not yet installed
    KeyDerived,
    /// Encrypted framing in effect
    Active,
    /// Handshake failed or connection closed
    Closed,
}

impl HandshakePhase {
    /// Get the phase name
    pub fn name(&self) -> &'static str {
        match self {
            Self::New => "New",
            Self::KeyExchangePending => "KeyExchangePending",
            Self::KeyDerived => "KeyDerived",
            Self::Active => "Active",
            Self::Closed => "Closed",
        }
    }
}

impl fmt::Display for HandshakePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Server key exchange offer (MsgHandshake, server to client)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeOffer {
    pub padding: Vec<u8>,
    /// IV of the server to client keystream
    pub server_iv: [u8; IV_SIZE],
    /// IV of the client to server keystream
    pub client_iv: [u8; IV_SIZE],
    /// Server public value, big-endian
    pub public_key: Vec<u8>,
}

impl HandshakeOffer {
    /// HKDF salt shared by both sides
    fn salt(&self) -> [u8; IV_SIZE * 2] {
        let mut salt = [0u8; IV_SIZE * 2];
        salt[..IV_SIZE].copy_from_slice(&self.server_iv);
        salt[IV_SIZE..].copy_from_slice(&self.client_iv);
        salt
    }
}

impl Packet for HandshakeOffer {
    const TYPE: PacketType = PacketType::MsgHandshake;

    fn decode(frame: &[u8]) -> std::result::Result<Self, DecodeError> {
        let mut reader = read_typed_header(frame, Self::TYPE)?;
        let padding_len = reader.read_u8("padding")? as usize;
        let padding = reader.read_bytes(padding_len, "padding")?.to_vec();
        let mut server_iv = [0u8; IV_SIZE];
        server_iv.copy_from_slice(reader.read_bytes(IV_SIZE, "server_iv")?);
        let mut client_iv = [0u8; IV_SIZE];
        client_iv.copy_from_slice(reader.read_bytes(IV_SIZE, "client_iv")?);
        let key_len = reader.read_u16("public_key")? as usize;
        let public_key = reader.read_bytes(key_len, "public_key")?.to_vec();
        Ok(Self {
            padding,
            server_iv,
            client_iv,
            public_key,
        })
    }

    fn encode(&self) -> Bytes {
        let padding = &self.padding[..self.padding.len().min(u8::MAX as usize)];
        let mut writer =
            PacketWriter::with_capacity(3 + padding.len() + IV_SIZE * 2 + self.public_key.len());
        writer
            .write_u8(padding.len() as u8)
            .write_bytes(padding)
            .write_bytes(&self.server_iv)
            .write_bytes(&self.client_iv)
            .write_u16(self.public_key.len() as u16)
            .write_bytes(&self.public_key);
        writer.finish(Self::TYPE.as_u16())
    }
}

/// Client key exchange reply (MsgHandshake, client to server)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeReply {
    pub padding: Vec<u8>,
    /// Client public value, big-endian
    pub public_key: Vec<u8>,
}

impl Packet for HandshakeReply {
    const TYPE: PacketType = PacketType::MsgHandshake;

    fn decode(frame: &[u8]) -> std::result::Result<Self, DecodeError> {
        let mut reader = read_typed_header(frame, Self::TYPE)?;
        let padding_len = reader.read_u8("padding")? as usize;
        let padding = reader.read_bytes(padding_len, "padding")?.to_vec();
        let key_len = reader.read_u16("public_key")? as usize;
        let public_key = reader.read_bytes(key_len, "public_key")?.to_vec();
        Ok(Self {
            padding,
            public_key,
        })
    }

    fn encode(&self) -> Bytes {
        let padding = &self.padding[..self.padding.len().min(u8::MAX as usize)];
        let mut writer = PacketWriter::with_capacity(3 + padding.len() + self.public_key.len());
        writer
            .write_u8(padding.len() as u8)
            .write_bytes(padding)
            .write_u16(self.public_key.len() as u16)
            .write_bytes(&self.public_key);
        writer.finish(Self::TYPE.as_u16())
    }
}

/// Per-connection key exchange state machine
pub struct Handshake {
    phase: HandshakePhase,
    exchange: Option<DiffieHellman>,
    salt: [u8; IV_SIZE * 2],
    server_iv: [u8; IV_SIZE],
    client_iv: [u8; IV_SIZE],
}

impl Handshake {
    /// Create a handshake in the `New` phase
    pub fn new() -> Self {
        Self {
            phase: HandshakePhase::New,
            exchange: None,
            salt: [0u8; IV_SIZE * 2],
            server_iv: [0u8; IV_SIZE],
            client_iv: [0u8; IV_SIZE],
        }
    }

    /// Current phase
    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// Whether ephemeral key material is still held
    pub fn holds_key_material(&self) -> bool {
        self.exchange.is_some()
    }

    /// Draw key material and build the offer to send to the peer
    ///
    /// The private exponent, both IVs and the padding are drawn concurrently;
    /// the public value is computed on the blocking pool.
    pub async fn initiate(&mut self, randomness: &dyn Randomness) -> Result<HandshakeOffer> {
        self.expect_phase(HandshakePhase::New)?;

        let (exchange, ivs, padding) = match tokio::try_join!(
            generate_key_pair(randomness),
            draw_ivs(randomness),
            draw_padding(randomness),
        ) {
            Ok(drawn) => drawn,
            Err(e) => {
                self.close();
                return Err(e);
            }
        };

        let offer = HandshakeOffer {
            padding,
            server_iv: ivs.0,
            client_iv: ivs.1,
            public_key: exchange.public_key_bytes(),
        };

        self.server_iv = offer.server_iv;
        self.client_iv = offer.client_iv;
        self.salt = offer.salt();
        self.exchange = Some(exchange);
        self.phase = HandshakePhase::KeyExchangePending;
        Ok(offer)
    }

    /// Complete the exchange with the peer's reply and derive the cipher
    ///
    /// The private exponent is released as soon as the keys exist. Any
    /// failure closes the handshake; there is no retry.
    pub fn complete(&mut self, reply: &HandshakeReply) -> std::result::Result<CipherPair, HandshakeError> {
        self.expect_phase(HandshakePhase::KeyExchangePending)?;

        let result = self.derive(reply);
        match result {
            Ok(ciphers) => {
                self.exchange = None;
                self.phase = HandshakePhase::KeyDerived;
                Ok(ciphers)
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    fn derive(&self, reply: &HandshakeReply) -> std::result::Result<CipherPair, HandshakeError> {
        let exchange = self
            .exchange
            .as_ref()
            .ok_or(HandshakeError::InvalidPhase {
                expected: HandshakePhase::KeyExchangePending.name(),
                actual: self.phase.name(),
            })?;
        let secret = exchange.shared_secret(&reply.public_key)?;
        let keys = derive_session_keys(&secret, &self.salt)?;
        Ok(CipherPair {
            encrypt: CipherStream::new(&keys.server_to_client, &self.server_iv)?,
            decrypt: CipherStream::new(&keys.client_to_server, &self.client_iv)?,
        })
    }

    /// Mark the derived cipher as installed on the connection
    pub fn activate(&mut self) -> std::result::Result<(), HandshakeError> {
        self.expect_phase(HandshakePhase::KeyDerived)?;
        self.phase = HandshakePhase::Active;
        Ok(())
    }

    /// Drop key material and move to `Closed`
    pub fn close(&mut self) {
        self.exchange = None;
        self.phase = HandshakePhase::Closed;
    }

    /// Answer a server offer as the client side of the exchange
    ///
    /// Returns the reply to send and the client's cipher pair. Used by tools
    /// and tests that act as the peer.
    pub async fn respond(
        offer: &HandshakeOffer,
        randomness: &dyn Randomness,
    ) -> Result<(HandshakeReply, CipherPair)> {
        let (exchange, padding) =
            tokio::try_join!(generate_key_pair(randomness), draw_padding(randomness))?;

        let secret = exchange.shared_secret(&offer.public_key)?;
        let keys = derive_session_keys(&secret, &offer.salt())?;
        let ciphers = CipherPair {
            encrypt: CipherStream::new(&keys.client_to_server, &offer.client_iv)?,
            decrypt: CipherStream::new(&keys.server_to_client, &offer.server_iv)?,
        };

        let reply = HandshakeReply {
            padding,
            public_key: exchange.public_key_bytes(),
        };
        Ok((reply, ciphers))
    }

    fn expect_phase(&self, expected: HandshakePhase) -> std::result::Result<(), HandshakeError> {
        if self.phase != expected {
            return Err(HandshakeError::InvalidPhase {
                expected: expected.name(),
                actual: self.phase.name(),
            });
        }
        Ok(())
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handshake")
            .field("phase", &self.phase)
            .field("holds_key_material", &self.holds_key_material())
            .finish()
    }
}

async fn generate_key_pair(randomness: &dyn Randomness) -> Result<DiffieHellman> {
    let mut private_key = Zeroizing::new([0u8; PRIVATE_KEY_SIZE]);
    randomness.next_bytes(&mut private_key[..]).await?;
    tokio::task::spawn_blocking(move || DiffieHellman::from_private_bytes(private_key))
        .await
        .map_err(|e| ServerError::Handshake(HandshakeError::KeyDerivation(e.to_string())))
}

async fn draw_ivs(randomness: &dyn Randomness) -> Result<([u8; IV_SIZE], [u8; IV_SIZE])> {
    let mut server_iv = [0u8; IV_SIZE];
    let mut client_iv = [0u8; IV_SIZE];
    randomness.next_bytes(&mut server_iv).await?;
    randomness.next_bytes(&mut client_iv).await?;
    Ok((server_iv, client_iv))
}

async fn draw_padding(randomness: &dyn Randomness) -> Result<Vec<u8>> {
    let len = randomness
        .next_int(MIN_PADDING as i32, MAX_PADDING as i32 + 1)
        .await? as usize;
    let mut padding = vec![0u8; len];
    randomness.next_bytes(&mut padding).await?;
    Ok(padding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::RandomnessService;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_offer_roundtrip() {
        let offer = HandshakeOffer {
            padding: vec![1, 2, 3],
            server_iv: [4; IV_SIZE],
            client_iv: [5; IV_SIZE],
            public_key: vec![9; 256],
        };
        let frame = offer.encode();
        assert_eq!(frame.len(), 4 + 1 + 3 + 16 + 2 + 256);
        assert_eq!(HandshakeOffer::decode(&frame).unwrap(), offer);
    }

    #[test]
    fn test_reply_truncated_key() {
        let reply = HandshakeReply {
            padding: vec![],
            public_key: vec![7; 256],
        };
        let frame = reply.encode();
        let err = HandshakeReply::decode(&frame[..100]).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::TruncatedField {
                field: "public_key",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_full_exchange_activates_matching_ciphers() {
        let rng = RandomnessService::with_seed(42);
        let mut server = Handshake::new();
        assert_eq!(server.phase(), HandshakePhase::New);

        let offer = server.initiate(&rng).await.unwrap();
        assert_eq!(server.phase(), HandshakePhase::KeyExchangePending);
        assert!(server.holds_key_material());
        assert!((MIN_PADDING..=MAX_PADDING).contains(&offer.padding.len()));

        let (reply, client) = Handshake::respond(&offer, &rng).await.unwrap();
        let server_ciphers = server.complete(&reply).unwrap();
        assert_eq!(server.phase(), HandshakePhase::KeyDerived);
        assert!(!server.holds_key_material());
        server.activate().unwrap();
        assert_eq!(server.phase(), HandshakePhase::Active);
        assert!(server.activate().is_err());

        let (mut server_encrypt, mut server_decrypt) = server_ciphers.split();
        let (mut client_encrypt, mut client_decrypt) = client.split();

        let mut data = b"hello from the server".to_vec();
        server_encrypt.apply(&mut data);
        client_decrypt.apply(&mut data);
        assert_eq!(data, b"hello from the server");

        let mut data = b"hello from the client".to_vec();
        client_encrypt.apply(&mut data);
        server_decrypt.apply(&mut data);
        assert_eq!(data, b"hello from the client");
    }

    #[tokio::test]
    async fn test_invalid_public_key_closes() {
        let rng = RandomnessService::with_seed(1);
        let mut server = Handshake::new();
        server.initiate(&rng).await.unwrap();

        let reply = HandshakeReply {
            padding: vec![],
            public_key: vec![1],
        };
        let err = server.complete(&reply).unwrap_err();
        assert!(matches!(err, HandshakeError::InvalidPublicKey));
        assert_eq!(server.phase(), HandshakePhase::Closed);
        assert!(!server.holds_key_material());

        // No retry once closed.
        assert!(server.complete(&reply).is_err());
    }

    #[tokio::test]
    async fn test_complete_before_initiate_fails() {
        let mut server = Handshake::new();
        let reply = HandshakeReply {
            padding: vec![],
            public_key: vec![2],
        };
        let err = server.complete(&reply).unwrap_err();
        assert!(matches!(err, HandshakeError::InvalidPhase { .. }));
    }
}
