//! Cryptography module
//!
//! This module provides cryptographic primitives used by the Embergate server:
//! - Diffie-Hellman key exchange and HKDF session key derivation
//! - ChaCha20 stream cipher for established connections
//! - Shared randomness service for key material and IVs

pub mod cipher;
pub mod exchange;
pub mod random;

// Re-export commonly used types
pub use cipher::{CipherPair, CipherStream, IV_SIZE};
pub use exchange::DiffieHellman;
pub use random::{Randomness, RandomnessService};
