// src/miner/algorithm/chukwa.rs
//! Argon2id implementations of the Chukwa algorithm family
//!
//! The three supported variants share everything except their memory and
//! iteration parameters. The salt is the first sixteen bytes of the blob and
//! the password is the whole blob, producing a 32-byte digest.

use crate::miner::algorithm::HashAlgorithm;
use crate::types::{AlgorithmType, OptimizationMethod};
use crate::utils::error::MinerError;
use argon2::{Algorithm, Argon2, Params, Version};

/// Number of blob bytes used as the Argon2 salt.
pub const SALT_LENGTH: usize = 16;

/// Argon2id hasher sized for one of the Chukwa variants
///
/// Construction is cheap; the memory-heavy work happens inside the `argon2`
/// crate on each `hash` call.
pub struct ChukwaHash {
    variant: AlgorithmType,
    context: Argon2<'static>,
}

impl ChukwaHash {
    /// Creates a hasher for the given variant
    ///
    /// The optimisation hint is injected here rather than read from global
    /// state; the underlying implementation selects its own vectorised paths,
    /// so the hint only needs to be a known value.
    pub fn new(
        variant: AlgorithmType,
        _optimization: OptimizationMethod,
    ) -> Result<Self, MinerError> {
        let params = Params::new(
            variant.memory_kb(),
            variant.iterations(),
            variant.lanes(),
            Some(32),
        )
        .map_err(|e| MinerError::AlgorithmError(format!("Invalid Argon2 parameters: {}", e)))?;

        Ok(Self {
            variant,
            context: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    /// The variant this hasher is sized for.
    pub fn variant(&self) -> AlgorithmType {
        self.variant
    }
}

impl HashAlgorithm for ChukwaHash {
    fn init(&mut self, blob: &[u8]) -> Result<(), MinerError> {
        if blob.len() < SALT_LENGTH {
            return Err(MinerError::AlgorithmError(format!(
                "Blob too short for salt: {} < {} bytes",
                blob.len(),
                SALT_LENGTH
            )));
        }

        Ok(())
    }

    fn hash(&mut self, blob: &[u8]) -> Result<[u8; 32], MinerError> {
        if blob.len() < SALT_LENGTH {
            return Err(MinerError::AlgorithmError(format!(
                "Blob too short for salt: {} < {} bytes",
                blob.len(),
                SALT_LENGTH
            )));
        }

        let mut digest = [0u8; 32];

        self.context
            .hash_password_into(blob, &blob[..SALT_LENGTH], &mut digest)
            .map_err(|e| MinerError::AlgorithmError(format!("Argon2 hashing failed: {}", e)))?;

        Ok(digest)
    }
}
