//! Shared randomness service
//!
//! Many connections draw key material and IVs concurrently during their
//! handshakes. The generator is not safe for concurrent use, so access is
//! serialized through a mutex held only for the duration of one draw.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

use crate::error::{HandshakeError, Result, ServerError};

/// Asynchronous source of random numbers
#[async_trait]
pub trait Randomness: Send + Sync {
    /// Next integer in `[min, max)`; returns `min` when the range is empty
    async fn next_int(&self, min: i32, max: i32) -> Result<i32>;

    /// Fill `buf` with random bytes
    async fn next_bytes(&self, buf: &mut [u8]) -> Result<()>;
}

/// Randomness backed by a seeded `StdRng`
pub struct RandomnessService {
    rng: Mutex<StdRng>,
}

impl RandomnessService {
    /// Create a service seeded from the operating system
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Create a deterministic service
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomnessService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Randomness for RandomnessService {
    async fn next_int(&self, min: i32, max: i32) -> Result<i32> {
        if min > max {
            return Err(ServerError::Internal(format!(
                "invalid random range: {min} > {max}"
            )));
        }
        if min == max {
            return Ok(min);
        }
        Ok(self.rng.lock().gen_range(min..max))
    }

    async fn next_bytes(&self, buf: &mut [u8]) -> Result<()> {
        self.rng
            .lock()
            .try_fill_bytes(buf)
            .map_err(|e| HandshakeError::Randomness(e.to_string()).into())
    }
}

impl std::fmt::Debug for RandomnessService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RandomnessService").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_next_int_bounds() {
        let rng = RandomnessService::with_seed(7);
        for _ in 0..1000 {
            let value = rng.next_int(-5, 5).await.unwrap();
            assert!((-5..5).contains(&value));
        }
        assert_eq!(rng.next_int(3, 3).await.unwrap(), 3);
        assert!(rng.next_int(4, 3).await.is_err());
    }

    #[tokio::test]
    async fn test_next_bytes_fills_buffer() {
        let rng = RandomnessService::with_seed(11);
        let mut buf = [0u8; 64];
        rng.next_bytes(&mut buf).await.unwrap();
        assert!(buf.iter().any(|&b| b != 0));
    }

    #[tokio::test]
    async fn test_concurrent_draws() {
        let rng = Arc::new(RandomnessService::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let rng = rng.clone();
            handles.push(tokio::spawn(async move {
                let mut iv = [0u8; 8];
                for _ in 0..100 {
                    rng.next_bytes(&mut iv).await.unwrap();
                }
                iv
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
