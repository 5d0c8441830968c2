//! Chukwa Miner - Argon2/Chukwa pool mining client in Rust
//!
//! This crate provides a complete pool mining client for the Chukwa family of
//! Argon2id proof-of-work algorithms, with support for:
//! - Multiple prioritised pools with automatic failover and promotion
//! - CPU mining plus a pluggable GPU backend
//! - Nonce-space partitioning across heterogeneous devices
//! - Dev-fee rotation between two pool managers

#![warn(missing_docs)]
#![forbid(unsafe_code)]

/// Miner core: backends, orchestration, the dev-fee scheduler and algorithms
pub mod miner;

/// Network communication components for pool connections
pub mod network;

/// Hashrate and share accounting
pub mod stats;

/// Utility functions and error handling
pub mod utils;

/// Command-line interface definitions
pub mod cli;

/// Configuration management
pub mod config;

/// Shared type definitions
pub mod types;

// Core exports
pub use cli::Options;
pub use config::{HardwareConfig, MinerConfig, NonceInfo, Pool};
pub use miner::{Backend, CpuBackend, GpuBackend, MinerManager};
pub use network::{Job, PoolCommunication};
pub use stats::HashManager;
pub use types::{AlgorithmType, OptimizationMethod};
pub use utils::{init_logging, MinerError};
