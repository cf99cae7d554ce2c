//! Stream cipher for established connections
//!
//! Each direction of a connection gets its own ChaCha20 keystream (64-bit IV
//! variant, matching the 8-byte IVs carried by the handshake offer). The read
//! loop owns the inbound half and the writer task owns the outbound half, so
//! keystream order always follows socket order.

use std::fmt;

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20Legacy;

use super::exchange::KEY_SIZE;
use crate::error::HandshakeError;

/// Size of a stream IV in bytes
pub const IV_SIZE: usize = 8;

/// One direction of an encrypted connection
pub struct CipherStream {
    inner: ChaCha20Legacy,
}

impl CipherStream {
    /// Create a keystream from a key and IV
    pub fn new(key: &[u8; KEY_SIZE], iv: &[u8; IV_SIZE]) -> Result<Self, HandshakeError> {
        let inner = ChaCha20Legacy::new_from_slices(key, iv)
            .map_err(|e| HandshakeError::KeyDerivation(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Encrypt or decrypt `data` in place, advancing the keystream
    #[inline]
    pub fn apply(&mut self, data: &mut [u8]) {
        self.inner.apply_keystream(data);
    }
}

impl fmt::Debug for CipherStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherStream").finish_non_exhaustive()
    }
}

/// Both directions of an encrypted connection
#[derive(Debug)]
pub struct CipherPair {
    /// Applied to outgoing bytes
    pub encrypt: CipherStream,
    /// Applied to incoming bytes
    pub decrypt: CipherStream,
}

impl CipherPair {
    /// Split into `(encrypt, decrypt)` halves for separate owners
    pub fn split(self) -> (CipherStream, CipherStream) {
        (self.encrypt, self.decrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_is_symmetric() {
        let key = [7u8; KEY_SIZE];
        let iv = [1u8; IV_SIZE];
        let mut sender = CipherStream::new(&key, &iv).unwrap();
        let mut receiver = CipherStream::new(&key, &iv).unwrap();

        let plain = b"frame bytes over the wire".to_vec();
        let mut data = plain.clone();
        sender.apply(&mut data);
        assert_ne!(data, plain);
        receiver.apply(&mut data);
        assert_eq!(data, plain);
    }

    #[test]
    fn test_keystream_continues_across_calls() {
        let key = [9u8; KEY_SIZE];
        let iv = [2u8; IV_SIZE];
        let mut whole = CipherStream::new(&key, &iv).unwrap();
        let mut pieces = CipherStream::new(&key, &iv).unwrap();

        let mut a = vec![0u8; 100];
        whole.apply(&mut a);

        let mut b = vec![0u8; 100];
        let (first, second) = b.split_at_mut(37);
        pieces.apply(first);
        pieces.apply(second);
        assert_eq!(a, b);
    }
}
