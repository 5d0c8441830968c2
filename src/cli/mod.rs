// src/cli/mod.rs
//! Command-line interface definitions

/// Argument definitions and parsing
pub mod commands;

pub use commands::Options;
