// src/config/mod.rs
//! Configuration management for the miner
//!
//! This module handles all configuration-related functionality including:
//! - Loading, validating and normalising the `config.json` document
//! - Building a configuration from command-line arguments
//! - Interactive prompting when neither is available
//! - The hardware configuration shared with the nonce partitioner

/// Core configuration implementation
///
/// Contains the [`MinerConfig`] and [`Pool`] types and the configuration
/// resolution logic.
pub mod config;

/// Protocol and dev-fee constants
pub mod constants;

/// Hardware configuration and the nonce partitioner
pub mod hardware;

// Re-export key items for easy access
pub use config::{MinerConfig, Pool};
pub use hardware::{CpuConfig, DeviceSelector, GpuDevice, GpuVendor, HardwareConfig, NonceInfo};
