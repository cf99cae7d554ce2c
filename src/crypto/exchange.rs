//! Diffie-Hellman key exchange
//!
//! Finite-field exchange over the 2048-bit MODP group from RFC 3526 (group 14,
//! generator 2). Public values travel as big-endian byte strings. The shared
//! secret is stretched with HKDF-SHA256 into one key per direction, salted
//! with both IVs of the offer so that a replayed offer derives different keys.

use std::fmt;

use hkdf::Hkdf;
use num_bigint::BigUint;
use once_cell::sync::Lazy;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::HandshakeError;

/// Size of the private exponent in bytes
pub const PRIVATE_KEY_SIZE: usize = 32;

/// Size of a public value in bytes
pub const PUBLIC_KEY_SIZE: usize = 256;

/// Size of a derived stream key in bytes
pub const KEY_SIZE: usize = 32;

const GENERATOR: u32 = 2;

const INFO_SERVER_TO_CLIENT: &[u8] = b"embergate server-to-client";
const INFO_CLIENT_TO_SERVER: &[u8] = b"embergate client-to-server";

#[rustfmt::skip]
const MODP_2048: [u8; PUBLIC_KEY_SIZE] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xC9, 0x0F, 0xDA, 0xA2, 0x21, 0x68, 0xC2, 0x34,
    0xC4, 0xC6, 0x62, 0x8B, 0x80, 0xDC, 0x1C, 0xD1, 0x29, 0x02, 0x4E, 0x08, 0x8A, 0x67, 0xCC, 0x74,
    0x02, 0x0B, 0xBE, 0xA6, 0x3B, 0x13, 0x9B, 0x22, 0x51, 0x4A, 0x08, 0x79, 0x8E, 0x34, 0x04, 0xDD,
    0xEF, 0x95, 0x19, 0xB3, 0xCD, 0x3A, 0x43, 0x1B, 0x30, 0x2B, 0x0A, 0x6D, 0xF2, 0x5F, 0x14, 0x37,
    0x4F, 0xE1, 0x35, 0x6D, 0x6D, 0x51, 0xC2, 0x45, 0xE4, 0x85, 0xB5, 0x76, 0x62, 0x5E, 0x7E, 0xC6,
    0xF4, 0x4C, 0x42, 0xE9, 0xA6, 0x37, 0xED, 0x6B, 0x0B, 0xFF, 0x5C, 0xB6, 0xF4, 0x06, 0xB7, 0xED,
    0xEE, 0x38, 0x6B, 0xFB, 0x5A, 0x89, 0x9F, 0xA5, 0xAE, 0x9F, 0x24, 0x11, 0x7C, 0x4B, 0x1F, 0xE6,
    0x49, 0x28, 0x66, 0x51, 0xEC, 0xE4, 0x5B, 0x3D, 0xC2, 0x00, 0x7C, 0xB8, 0xA1, 0x63, 0xBF, 0x05,
    0x98, 0xDA, 0x48, 0x36, 0x1C, 0x55, 0xD3, 0x9A, 0x69, 0x16, 0x3F, 0xA8, 0xFD, 0x24, 0xCF, 0x5F,
    0x83, 0x65, 0x5D, 0x23, 0xDC, 0xA3, 0xAD, 0x96, 0x1C, 0x62, 0xF3, 0x56, 0x20, 0x85, 0x52, 0xBB,
    0x9E, 0xD5, 0x29, 0x07, 0x70, 0x96, 0x96, 0x6D, 0x67, 0x0C, 0x35, 0x4E, 0x4A, 0xBC, 0x98, 0x04,
    0xF1, 0x74, 0x6C, 0x08, 0xCA, 0x18, 0x21, 0x7C, 0x32, 0x90, 0x5E, 0x46, 0x2E, 0x36, 0xCE, 0x3B,
    0xE3, 0x9E, 0x77, 0x2C, 0x18, 0x0E, 0x86, 0x03, 0x9B, 0x27, 0x83, 0xA2, 0xEC, 0x07, 0xA2, 0x8F,
    0xB5, 0xC5, 0x5D, 0xF0, 0x6F, 0x4C, 0x52, 0xC9, 0xDE, 0x2B, 0xCB, 0xF6, 0x95, 0x58, 0x17, 0x18,
    0x39, 0x95, 0x49, 0x7C, 0xEA, 0x95, 0x6A, 0xE5, 0x15, 0xD2, 0x26, 0x18, 0x98, 0xFA, 0x05, 0x10,
    0x15, 0x72, 0x8E, 0x5A, 0x8A, 0xAC, 0xAA, 0x68, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
];

static PRIME: Lazy<BigUint> = Lazy::new(|| BigUint::from_bytes_be(&MODP_2048));

/// One side of a Diffie-Hellman exchange
pub struct DiffieHellman {
    private_key: Zeroizing<[u8; PRIVATE_KEY_SIZE]>,
    public_key: BigUint,
}

impl DiffieHellman {
    /// Build the key pair from random private exponent bytes
    pub fn from_private_bytes(mut private_key: Zeroizing<[u8; PRIVATE_KEY_SIZE]>) -> Self {
        // Force a full-width exponent so the public value is never trivial.
        private_key[0] |= 0x80;
        let exponent = BigUint::from_bytes_be(&private_key[..]);
        let public_key = BigUint::from(GENERATOR).modpow(&exponent, &PRIME);
        Self {
            private_key,
            public_key,
        }
    }

    /// Public value as big-endian bytes, left-padded to the group size
    pub fn public_key_bytes(&self) -> Vec<u8> {
        let raw = self.public_key.to_bytes_be();
        let mut bytes = vec![0u8; PUBLIC_KEY_SIZE.saturating_sub(raw.len())];
        bytes.extend_from_slice(&raw);
        bytes
    }

    /// Compute the shared secret from the peer's public value
    pub fn shared_secret(&self, peer_public: &[u8]) -> Result<Zeroizing<Vec<u8>>, HandshakeError> {
        let peer = validate_public_key(peer_public)?;
        let exponent = BigUint::from_bytes_be(&self.private_key[..]);
        let secret = peer.modpow(&exponent, &PRIME);
        Ok(Zeroizing::new(secret.to_bytes_be()))
    }
}

impl fmt::Debug for DiffieHellman {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiffieHellman")
            .field("public_key_bits", &self.public_key.bits())
            .finish_non_exhaustive()
    }
}

/// Check `1 < y < p - 1` for a peer public value
pub fn validate_public_key(bytes: &[u8]) -> Result<BigUint, HandshakeError> {
    let value = BigUint::from_bytes_be(bytes);
    let one = BigUint::from(1u32);
    let upper = &*PRIME - &one;
    if value <= one || value >= upper {
        return Err(HandshakeError::InvalidPublicKey);
    }
    Ok(value)
}

/// Keys for both directions of a connection
pub struct SessionKeys {
    pub server_to_client: Zeroizing<[u8; KEY_SIZE]>,
    pub client_to_server: Zeroizing<[u8; KEY_SIZE]>,
}

/// Derive per-direction stream keys from a shared secret
pub fn derive_session_keys(shared_secret: &[u8], salt: &[u8]) -> Result<SessionKeys, HandshakeError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), shared_secret);

    let mut server_to_client = Zeroizing::new([0u8; KEY_SIZE]);
    hk.expand(INFO_SERVER_TO_CLIENT, &mut server_to_client[..])
        .map_err(|e| HandshakeError::KeyDerivation(e.to_string()))?;

    let mut client_to_server = Zeroizing::new([0u8; KEY_SIZE]);
    hk.expand(INFO_CLIENT_TO_SERVER, &mut client_to_server[..])
        .map_err(|e| HandshakeError::KeyDerivation(e.to_string()))?;

    Ok(SessionKeys {
        server_to_client,
        client_to_server,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_pair(seed: u8) -> DiffieHellman {
        let mut private_key = Zeroizing::new([0u8; PRIVATE_KEY_SIZE]);
        for (i, byte) in private_key.iter_mut().enumerate() {
            *byte = seed.wrapping_mul(31).wrapping_add(i as u8);
        }
        DiffieHellman::from_private_bytes(private_key)
    }

    #[test]
    fn test_prime_is_2048_bits() {
        assert_eq!(PRIME.bits(), 2048);
    }

    #[test]
    fn test_both_sides_agree() {
        let server = key_pair(1);
        let client = key_pair(2);

        let a = server.shared_secret(&client.public_key_bytes()).unwrap();
        let b = client.shared_secret(&server.public_key_bytes()).unwrap();
        assert_eq!(*a, *b);
        assert_eq!(server.public_key_bytes().len(), PUBLIC_KEY_SIZE);
    }

    #[test]
    fn test_rejects_degenerate_public_values() {
        let server = key_pair(3);
        assert!(server.shared_secret(&[]).is_err());
        assert!(server.shared_secret(&[1]).is_err());
        assert!(server.shared_secret(&MODP_2048).is_err());

        let mut p_minus_one = MODP_2048;
        p_minus_one[PUBLIC_KEY_SIZE - 1] -= 1;
        assert!(server.shared_secret(&p_minus_one).is_err());
        assert!(server.shared_secret(&[2]).is_ok());
    }

    #[test]
    fn test_session_keys_differ_per_direction() {
        let keys = derive_session_keys(b"shared", b"salt").unwrap();
        assert_ne!(*keys.server_to_client, *keys.client_to_server);

        let again = derive_session_keys(b"shared", b"salt").unwrap();
        assert_eq!(*keys.server_to_client, *again.server_to_client);

        let other_salt = derive_session_keys(b"shared", b"pepper").unwrap();
        assert_ne!(*keys.server_to_client, *other_salt.server_to_client);
    }
}
