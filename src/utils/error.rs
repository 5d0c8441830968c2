// src/utils/error.rs
use std::io;
use thiserror::Error;

/// Main error type for the mining application
///
/// This enum represents all possible error conditions that can occur
/// during mining operations, including network, I/O, protocol, and
/// configuration errors.
#[derive(Error, Debug)]
pub enum MinerError {
    /// Errors related to mining algorithms (e.g., unsupported algorithm)
    #[error("Algorithm error: {0}")]
    AlgorithmError(String),

    /// Errors related to network connectivity
    #[error("Network connection error: {0}")]
    ConnectionError(String),

    /// Errors in protocol handling or invalid protocol messages
    #[error("Protocol violation: {0}")]
    ProtocolError(String),

    /// Standard I/O operation errors
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Configuration file or parameter errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Invalid user input or parameter errors
    #[error("Invalid input: {0}")]
    InputError(String),

    /// A GPU worker failed and was retired
    #[error("Backend error: {0}")]
    BackendError(String),
}

/// Converts hex decoding errors into MinerError
///
/// Used when invalid hex data is encountered during blob or target decoding
/// and configuration parsing.
impl From<hex::FromHexError> for MinerError {
    fn from(e: hex::FromHexError) -> Self {
        MinerError::InputError(format!("Hex conversion failed: {}", e))
    }
}
