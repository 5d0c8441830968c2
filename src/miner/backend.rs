// src/miner/backend.rs
//! The contract every compute backend implements
//!
//! A backend owns the workers for one device family. The orchestrator only
//! ever starts it, stops it, hands it a new job, or asks for stats; results
//! flow out through the submit callbacks passed at construction.

use crate::network::Job;
use std::sync::Arc;

/// A candidate produced by a worker, handed to the submit callback
#[derive(Debug, Clone)]
pub struct JobSubmit {
    /// The digest we computed
    pub hash: [u8; 32],

    /// Identifier of the job the digest belongs to
    pub job_id: String,

    /// The nonce that produced this digest
    pub nonce: u32,

    /// The target the digest has to beat
    pub target: u64,

    /// Who produced this digest, for example `CPU` or `GTX 1070-0`
    pub hardware: String,
}

/// Callback receiving every candidate (CPU path) or pre-filtered valid
/// candidates (GPU path)
pub type SubmitCallback = Arc<dyn Fn(JobSubmit) + Send + Sync>;

/// Callback crediting a batch of performed hashes to a device
pub type IncrementCallback = Arc<dyn Fn(u32, &str) + Send + Sync>;

/// Per-device performance numbers reported by a backend
#[derive(Debug, Clone)]
pub struct PerformanceStats {
    /// Device label, e.g. `CPU` or `GTX 1070-0`
    pub device: String,

    /// How many nonces the device consumes per round
    pub nonces_per_round: u32,
}

/// Abstract start/stop/new-job/stats contract for a compute device family
///
/// Required property: after `stop` returns, no submit callback fires again
/// until the next `start`. `set_new_job` is non-blocking and must be observed
/// by every worker before its next submission.
pub trait Backend: Send + Sync {
    /// Starts the backend's workers on the given job
    fn start(&self, job: Job, initial_nonce: u32);

    /// Stops all workers, blocking until they have quiesced
    fn stop(&self);

    /// Swaps the current job without restarting workers
    fn set_new_job(&self, job: Job, initial_nonce: u32);

    /// Current per-device performance numbers
    fn performance_stats(&self) -> Vec<PerformanceStats>;
}
