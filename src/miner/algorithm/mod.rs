// src/miner/algorithm/mod.rs
//! Mining algorithm implementations
//!
//! This module contains the hashing collaborators used by the CPU backend.
//! All three supported algorithms are Argon2id parameter sets, implemented
//! by wrapping the `argon2` crate.

/// Argon2id implementation of the Chukwa variants
pub mod chukwa;

use crate::types::{AlgorithmType, OptimizationMethod};
use crate::utils::error::MinerError;

pub use chukwa::ChukwaHash;

/// Common interface for the CPU hash functions
///
/// A blob-in, digest-out contract: the caller embeds the nonce into the blob
/// before hashing. `init` is a warm-up hook invoked once per job so an
/// implementation can pre-size any internal state.
pub trait HashAlgorithm: Send {
    /// Perform any per-job initialization for the given blob
    fn init(&mut self, blob: &[u8]) -> Result<(), MinerError>;

    /// Compute the 32-byte digest of the blob
    fn hash(&mut self, blob: &[u8]) -> Result<[u8; 32], MinerError>;
}

/// Creates the CPU hashing algorithm for the given pool algorithm name
///
/// # Arguments
/// * `algorithm` - A pool-facing algorithm name (any accepted alias)
/// * `optimization` - CPU optimisation hint, injected rather than global
///
/// # Errors
/// Returns `MinerError::AlgorithmError` if the name is not a known algorithm.
pub fn cpu_algorithm(
    algorithm: &str,
    optimization: OptimizationMethod,
) -> Result<Box<dyn HashAlgorithm>, MinerError> {
    let variant: AlgorithmType = algorithm
        .parse()
        .map_err(MinerError::AlgorithmError)?;

    Ok(Box::new(ChukwaHash::new(variant, optimization)?))
}
