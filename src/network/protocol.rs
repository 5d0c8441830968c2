// src/network/protocol.rs
//! Wire protocol types for the pool's line-delimited JSON protocol
//!
//! Incoming lines take one of four shapes: a pushed job, a status reply, a
//! login reply, or an error reply. Discrimination is by explicit inspection
//! of the decoded JSON in that order; the first matching shape wins.

use crate::config::Pool;
use crate::utils::error::MinerError;
use serde_json::Value;

/// Byte offset of the mutable 32-bit nonce within the blob.
pub const NONCE_OFFSET: usize = 39;

/// Number of leading blob bytes forming the Argon2 salt.
pub const SALT_LENGTH: usize = 16;

/// A unit of work received from a pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// The serialised block header. Bytes [39, 43) are the mutable nonce,
    /// bytes [0, 16) the salt.
    pub raw_blob: Vec<u8>,

    /// Opaque identifier the pool uses to recognise submissions for this job
    pub job_id: String,

    /// A digest is a share when its last 8 bytes, little-endian, are strictly
    /// below this
    pub target: u64,

    /// Human-readable difficulty, display only
    pub share_difficulty: u64,

    /// Algorithm name for this job; empty means inherit from the pool
    pub algorithm: String,

    /// Whether nicehash nonce rules apply (high byte reserved)
    pub is_nice_hash: bool,
}

impl Job {
    /// Parses a job object (`{"job_id", "blob", "target", "algo"?}`)
    ///
    /// # Errors
    /// Returns `MinerError::ProtocolError` on missing fields, undecodable
    /// hex, a blob too short to hold the nonce window, or a zero target.
    pub fn from_value(value: &Value) -> Result<Self, MinerError> {
        let job_id = value
            .get("job_id")
            .and_then(Value::as_str)
            .ok_or_else(|| MinerError::ProtocolError("Job missing job_id".to_string()))?
            .to_string();

        let blob_hex = value
            .get("blob")
            .and_then(Value::as_str)
            .ok_or_else(|| MinerError::ProtocolError("Job missing blob".to_string()))?;

        let raw_blob = hex::decode(blob_hex)
            .map_err(|e| MinerError::ProtocolError(format!("Job blob is not valid hex: {}", e)))?;

        if raw_blob.len() < NONCE_OFFSET + 4 {
            return Err(MinerError::ProtocolError(format!(
                "Job blob too short to contain a nonce: {} bytes",
                raw_blob.len()
            )));
        }

        let target_hex = value
            .get("target")
            .and_then(Value::as_str)
            .ok_or_else(|| MinerError::ProtocolError("Job missing target".to_string()))?;

        let target = parse_target(target_hex)?;

        let algorithm = value
            .get("algo")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        Ok(Job {
            raw_blob,
            job_id,
            target,
            share_difficulty: u64::MAX / target,
            algorithm,
            is_nice_hash: false,
        })
    }

    /// The current value of the blob's nonce window.
    pub fn nonce(&self) -> u32 {
        u32::from_le_bytes(
            self.raw_blob[NONCE_OFFSET..NONCE_OFFSET + 4]
                .try_into()
                .expect("blob length validated at construction"),
        )
    }

    /// Overwrites the blob's nonce window.
    pub fn set_nonce(&mut self, nonce: u32) {
        self.raw_blob[NONCE_OFFSET..NONCE_OFFSET + 4].copy_from_slice(&nonce.to_le_bytes());
    }

    /// The salt bytes at the front of the blob.
    pub fn salt(&self) -> &[u8] {
        &self.raw_blob[..SALT_LENGTH]
    }

    /// Fills in the pool-derived fields of a freshly parsed job: the nicehash
    /// flag, and the algorithm when the job left it empty or the pool asked
    /// to override it.
    pub fn update_from_pool(&mut self, pool: &Pool) {
        self.is_nice_hash = pool.nice_hash;

        if self.algorithm.is_empty() || pool.disable_auto_algo_select {
            self.algorithm = pool.algorithm.clone();
        }
    }
}

/// A successful login handshake reply
#[derive(Debug, Clone)]
pub struct LoginReply {
    /// The session identifier used to authenticate subsequent requests
    pub login_id: String,

    /// The first job to work on
    pub job: Job,
}

/// One parsed incoming pool message
#[derive(Debug, Clone)]
pub enum PoolMessage {
    /// A pushed job replacing the current one
    Job(Job),

    /// A status reply: `OK`, `KEEPALIVED`, or something to warn about
    Status {
        /// The reply id, stringified
        id: String,
        /// The status text
        status: String,
    },

    /// A login reply; only meaningful during the handshake
    Login(LoginReply),

    /// An error reply
    Error {
        /// Server error code
        code: i64,
        /// Server error message
        message: String,
    },
}

/// Parses one trimmed line from the pool
///
/// Shapes are attempted in order - job push, status, login, error - and the
/// first match wins. Note a login reply also carries a status field, so one
/// arriving outside the handshake classifies as a status message; the hash
/// manager's ack gating absorbs the resulting spurious `OK`.
pub fn parse_pool_message(message: &str) -> Result<PoolMessage, MinerError> {
    let value: Value = serde_json::from_str(message)?;

    // Job push
    if value.get("method").and_then(Value::as_str) == Some("job") {
        let params = value
            .get("params")
            .ok_or_else(|| MinerError::ProtocolError("Job push missing params".to_string()))?;

        return Ok(PoolMessage::Job(Job::from_value(params)?));
    }

    // Status reply
    let status = value
        .get("result")
        .and_then(|result| result.get("status"))
        .or_else(|| value.get("status"));

    if let Some(status) = status.and_then(Value::as_str) {
        let id = value.get("id").map(Value::to_string).unwrap_or_default();

        return Ok(PoolMessage::Status {
            id,
            status: status.to_string(),
        });
    }

    // Login reply
    if let Some(result) = value.get("result") {
        if result.get("id").is_some() && result.get("job").is_some() {
            return Ok(PoolMessage::Login(login_reply_from_value(&value)?));
        }
    }

    // Error reply
    if let Some(error) = value.get("error").filter(|error| !error.is_null()) {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        return Ok(PoolMessage::Error { code, message });
    }

    Err(MinerError::ProtocolError(format!(
        "Failed to parse pool message: {}",
        message
    )))
}

/// Parses the reply to a `login` request
///
/// Used synchronously during the handshake; an error reply surfaces as a
/// `ProtocolError` carrying the server's message so the retry loop can show
/// it.
pub fn parse_login_reply(message: &str) -> Result<LoginReply, MinerError> {
    let value: Value = serde_json::from_str(message).map_err(|e| {
        MinerError::ProtocolError(format!(
            "Failed to parse message from pool ({}) ({})",
            e, message
        ))
    })?;

    if let Some(error) = value.get("error").filter(|error| !error.is_null()) {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");

        return Err(MinerError::ProtocolError(message.to_string()));
    }

    login_reply_from_value(&value)
}

fn login_reply_from_value(value: &Value) -> Result<LoginReply, MinerError> {
    let result = value
        .get("result")
        .ok_or_else(|| MinerError::ProtocolError("Login reply missing result".to_string()))?;

    let login_id = result
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| MinerError::ProtocolError("Login reply missing id".to_string()))?
        .to_string();

    let job = result
        .get("job")
        .ok_or_else(|| MinerError::ProtocolError("Login reply missing job".to_string()))
        .and_then(Job::from_value)?;

    Ok(LoginReply { login_id, job })
}

/// Expands a pool target to its 64-bit form
///
/// A 4-byte compact target is read little-endian and shifted into the high
/// 32 bits; an 8-byte target is read little-endian as-is.
pub fn parse_target(target_hex: &str) -> Result<u64, MinerError> {
    let bytes = hex::decode(target_hex)
        .map_err(|e| MinerError::ProtocolError(format!("Target is not valid hex: {}", e)))?;

    let target = match bytes.len() {
        4 => {
            let compact = u32::from_le_bytes(bytes[..4].try_into().expect("length checked"));
            (compact as u64) << 32
        }
        8 => u64::from_le_bytes(bytes[..8].try_into().expect("length checked")),
        n => {
            return Err(MinerError::ProtocolError(format!(
                "Target must be 4 or 8 bytes, got {}",
                n
            )))
        }
    };

    if target == 0 {
        return Err(MinerError::ProtocolError("Job has a zero target".to_string()));
    }

    Ok(target)
}
