//! Hashrate and share accounting
//!
//! This module tracks everything the miner reports back to the user:
//! - Per-device and total hash counters
//! - Submitted/accepted share counts with stray-ack gating
//! - Pause-aware elapsed-time accounting so hashrates survive failovers
//! - Periodic stat printing, including a hardware line

/// The hash manager implementation
pub mod hash_manager;

// Re-export main components
pub use hash_manager::HashManager;
