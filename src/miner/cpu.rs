// src/miner/cpu.rs
//! CPU mining backend
//!
//! Spawns one hashing worker per configured thread. Workers read the shared
//! job and base nonce without locks; a per-worker "new job available" flag,
//! written with release ordering and read with acquire ordering, is the fence
//! that publishes them.

use crate::config::hardware::{DeviceSelector, HardwareConfig, NonceInfo};
use crate::miner::algorithm;
use crate::miner::backend::{Backend, JobSubmit, PerformanceStats, SubmitCallback};
use crate::network::Job;
use crate::types::OptimizationMethod;
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Nicehash reserves the high byte of the nonce; we may only vary the rest.
const NICEHASH_NONCE_MASK: u32 = 0x00ff_ffff;

/// State shared between the orchestrator and the hashing workers
struct SharedState {
    current_job: ArcSwap<Option<Job>>,
    base_nonce: AtomicU32,
    should_stop: AtomicBool,

    /// One flag per worker; raised whenever the job or nonce changes
    new_job_available: Vec<AtomicBool>,
}

/// CPU mining backend
pub struct CpuBackend {
    hardware: Arc<HardwareConfig>,
    submit_hash: SubmitCallback,
    state: Arc<SharedState>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl CpuBackend {
    /// Creates the backend
    ///
    /// # Arguments
    /// * `hardware` - Shared hardware config, consulted for thread count and
    ///   nonce partitioning
    /// * `submit_hash` - Receives every digest produced; responsible for
    ///   validity filtering
    pub fn new(hardware: Arc<HardwareConfig>, submit_hash: SubmitCallback) -> Self {
        let thread_count = hardware.cpu.thread_count as usize;

        CpuBackend {
            hardware,
            submit_hash,
            state: Arc::new(SharedState {
                current_job: ArcSwap::from_pointee(None),
                base_nonce: AtomicU32::new(0),
                should_stop: AtomicBool::new(false),
                new_job_available: (0..thread_count).map(|_| AtomicBool::new(false)).collect(),
            }),
            threads: Mutex::new(Vec::new()),
        }
    }
}

impl Backend for CpuBackend {
    fn start(&self, job: Job, initial_nonce: u32) {
        if !self.threads.lock().unwrap().is_empty() {
            self.stop();
        }

        self.state.should_stop.store(false, Ordering::Release);
        self.state.base_nonce.store(initial_nonce, Ordering::Release);
        self.state.current_job.store(Arc::new(Some(job)));

        for flag in &self.state.new_job_available {
            flag.store(false, Ordering::Release);
        }

        let mut threads = self.threads.lock().unwrap();

        for thread_index in 0..self.hardware.cpu.thread_count {
            let state = Arc::clone(&self.state);
            let hardware = Arc::clone(&self.hardware);
            let submit = Arc::clone(&self.submit_hash);
            let optimization = self.hardware.cpu.optimization_method;

            threads.push(std::thread::spawn(move || {
                hash_worker(state, hardware, submit, optimization, thread_index)
            }));
        }
    }

    fn stop(&self) {
        self.state.should_stop.store(true, Ordering::Release);

        // Kick every worker out of its inner loop
        for flag in &self.state.new_job_available {
            flag.store(true, Ordering::Release);
        }

        for thread in self.threads.lock().unwrap().drain(..) {
            let _ = thread.join();
        }
    }

    fn set_new_job(&self, job: Job, initial_nonce: u32) {
        self.state.base_nonce.store(initial_nonce, Ordering::Release);
        self.state.current_job.store(Arc::new(Some(job)));

        for flag in &self.state.new_job_available {
            flag.store(true, Ordering::Release);
        }
    }

    fn performance_stats(&self) -> Vec<PerformanceStats> {
        vec![PerformanceStats {
            device: "CPU".to_string(),
            nonces_per_round: self.hardware.cpu.thread_count,
        }]
    }
}

impl Drop for CpuBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One hashing worker
///
/// Round `i` of this worker tries `base + i*N + offset + threadIndex`, where
/// `N` and `offset` come from the partitioner. While any device has not
/// checked in yet the partitioner is re-queried every round, so a late
/// check-in realigns everyone before duplicate nonces are emitted.
fn hash_worker(
    state: Arc<SharedState>,
    hardware: Arc<HardwareConfig>,
    submit: SubmitCallback,
    optimization: OptimizationMethod,
    thread_index: u32,
) {
    let mut current_algorithm = String::new();
    let mut nonce_info = NonceInfo::default();

    while !state.should_stop.load(Ordering::Acquire) {
        let base_nonce = state.base_nonce.load(Ordering::Acquire);

        let Some(mut job) = (*state.current_job.load_full()).clone() else {
            std::thread::sleep(Duration::from_millis(50));
            continue;
        };

        let is_nice_hash = job.is_nice_hash;
        let pool_nonce = job.nonce();

        let mut algorithm = match algorithm::cpu_algorithm(&job.algorithm, optimization) {
            Ok(algorithm) => algorithm,
            Err(e) => {
                log::warn!("CPU thread {} cannot mine this job: {}", thread_index, e);
                wait_for_new_job(&state, thread_index);
                continue;
            }
        };

        if job.algorithm != current_algorithm {
            nonce_info = hardware.nonce_offset_info(DeviceSelector::Cpu);
            current_algorithm = job.algorithm.clone();
        }

        if let Err(e) = algorithm.init(&job.raw_blob) {
            log::warn!("CPU thread {} cannot mine this job: {}", thread_index, e);
            wait_for_new_job(&state, thread_index);
            continue;
        }

        let mut i: u32 = 0;

        while !state.new_job_available[thread_index as usize].load(Ordering::Acquire) {
            let our_nonce = base_nonce
                .wrapping_add(i.wrapping_mul(nonce_info.nonces_per_round))
                .wrapping_add(nonce_info.nonce_offset)
                .wrapping_add(thread_index);

            /* In nicehash mode only the low three bytes of the nonce are
             * ours; the high byte stays whatever the pool seeded it to. */
            let nonce = if is_nice_hash {
                (our_nonce & NICEHASH_NONCE_MASK) | (pool_nonce & !NICEHASH_NONCE_MASK)
            } else {
                our_nonce
            };

            job.set_nonce(nonce);

            match algorithm.hash(&job.raw_blob) {
                Ok(digest) => submit(JobSubmit {
                    hash: digest,
                    job_id: job.job_id.clone(),
                    nonce,
                    target: job.target,
                    hardware: "CPU".to_string(),
                }),
                Err(e) => {
                    log::warn!("CPU hashing failed: {}", e);
                    std::thread::sleep(Duration::from_millis(100));
                }
            }

            i = i.wrapping_add(1);

            /* If not all hardware has checked in with the new job, keep
             * fetching the partition to ensure we're not doing duplicate
             * work. */
            if !nonce_info.all_hardware_initialized {
                nonce_info = hardware.nonce_offset_info(DeviceSelector::Cpu);
            }
        }

        // Switch to the new job
        state.new_job_available[thread_index as usize].store(false, Ordering::Release);
    }
}

/// Parks a worker that cannot mine the current job until the next one.
fn wait_for_new_job(state: &SharedState, thread_index: u32) {
    while !state.new_job_available[thread_index as usize].load(Ordering::Acquire)
        && !state.should_stop.load(Ordering::Acquire)
    {
        std::thread::sleep(Duration::from_millis(100));
    }

    state.new_job_available[thread_index as usize].store(false, Ordering::Release);
}
