// src/stats/hash_manager.rs
use crate::miner::backend::JobSubmit;
use crate::network::PoolCommunication;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use sysinfo::{Components, System};

/// Tests a digest against the job target
///
/// A digest is a share when its last 8 bytes, read little-endian, are
/// strictly below the target.
pub fn is_hash_valid_for_target(hash: &[u8; 32], target: u64) -> bool {
    u64::from_le_bytes(hash[24..32].try_into().expect("digest is 32 bytes")) < target
}

/// Pause-aware elapsed time accounting
struct Timing {
    /// Start of hashing, shifted forward across pauses so that
    /// `now - effective_start` is mining time, not wall time
    effective_start: Instant,
    pause_time: Instant,
    paused: bool,
}

/// Hardware probes for the stats printer
struct HardwareMonitor {
    system: System,
    components: Components,
}

/// Tracks hash counts and share accounting, and gates submissions
///
/// Workers feed it through two paths: the CPU path sends every digest to
/// [`submit_hash`](HashManager::submit_hash), which filters for validity; the
/// GPU path sends pre-filtered candidates straight to
/// [`submit_valid_hash`](HashManager::submit_valid_hash).
pub struct HashManager {
    pool: Arc<PoolCommunication>,

    total_hashes: AtomicU64,
    submitted_hashes: AtomicU64,
    accepted_hashes: AtomicU64,

    /// Per-device monotonic hash counters, keyed by device label
    hash_producers: Mutex<HashMap<String, Arc<AtomicU64>>>,

    timing: Mutex<Timing>,
    monitor: Mutex<HardwareMonitor>,
}

impl HashManager {
    /// Creates a manager submitting through the given pool.
    pub fn new(pool: Arc<PoolCommunication>) -> Self {
        HashManager {
            pool,
            total_hashes: AtomicU64::new(0),
            submitted_hashes: AtomicU64::new(0),
            accepted_hashes: AtomicU64::new(0),
            hash_producers: Mutex::new(HashMap::new()),
            timing: Mutex::new(Timing {
                effective_start: Instant::now(),
                pause_time: Instant::now(),
                paused: false,
            }),
            monitor: Mutex::new(HardwareMonitor {
                system: System::new_all(),
                components: Components::new_with_refreshed_list(),
            }),
        }
    }

    /// Credits `count` hashes to a device
    ///
    /// The first hashes ever performed seed the effective start time, so the
    /// hashrate denominator begins when mining actually does.
    pub fn increment_hashes_performed(&self, count: u32, device: &str) {
        if self.total_hashes.load(Ordering::Relaxed) == 0 {
            self.timing.lock().unwrap().effective_start = Instant::now();
        }

        let counter = {
            let mut producers = self.hash_producers.lock().unwrap();
            Arc::clone(
                producers
                    .entry(device.to_string())
                    .or_insert_with(|| Arc::new(AtomicU64::new(0))),
            )
        };

        counter.fetch_add(count as u64, Ordering::Relaxed);
        self.total_hashes.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Submits a candidate that already beat the target.
    pub fn submit_valid_hash(&self, job_submit: &JobSubmit) {
        self.submitted_hashes.fetch_add(1, Ordering::Relaxed);
        self.pool
            .submit_share(&job_submit.hash, &job_submit.job_id, job_submit.nonce);
    }

    /// Takes one digest from the CPU path: counts it, tests it against the
    /// target, and submits it if it is a share.
    pub fn submit_hash(&self, job_submit: &JobSubmit) {
        self.increment_hashes_performed(1, &job_submit.hardware);

        if is_hash_valid_for_target(&job_submit.hash, job_submit.target) {
            self.submit_valid_hash(job_submit);
        }
    }

    /// Records a share-accepted message from the pool
    ///
    /// Pools occasionally ack shares we never submitted, and sometimes ack
    /// the same share twice; both are dropped so `accepted` never exceeds
    /// `submitted`.
    pub fn share_accepted(&self) {
        if self.total_hashes.load(Ordering::Relaxed) == 0
            || self.submitted_hashes.load(Ordering::Relaxed) == 0
        {
            return;
        }

        let accepted = loop {
            let accepted = self.accepted_hashes.load(Ordering::Relaxed);
            let submitted = self.submitted_hashes.load(Ordering::Relaxed);

            if accepted >= submitted {
                return;
            }

            if self
                .accepted_hashes
                .compare_exchange(accepted, accepted + 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break accepted + 1;
            }
        };

        log::info!(
            "{} Share accepted by pool! [{} / {}]",
            self.pool_prefix(),
            accepted,
            self.submitted_hashes.load(Ordering::Relaxed)
        );
    }

    /// Resumes elapsed-time accounting after a pause
    ///
    /// The paused duration is added onto the effective start, so the
    /// hashrate over a pause-resume cycle matches an uninterrupted run of the
    /// same mining time.
    pub fn start(&self) {
        let mut timing = self.timing.lock().unwrap();

        if timing.paused {
            let pause_duration = timing.pause_time.elapsed();
            timing.effective_start += pause_duration;
        }

        timing.paused = false;
    }

    /// Freezes elapsed-time accounting.
    pub fn pause(&self) {
        let mut timing = self.timing.lock().unwrap();
        timing.paused = true;
        timing.pause_time = Instant::now();
    }

    /// Zeroes the share counters. Called when swapping to a different pool,
    /// where the old counts no longer mean anything.
    pub fn reset_share_count(&self) {
        self.submitted_hashes.store(0, Ordering::Relaxed);
        self.accepted_hashes.store(0, Ordering::Relaxed);
    }

    /// Mining time elapsed, excluding completed pauses.
    pub fn effective_elapsed(&self) -> Duration {
        self.timing.lock().unwrap().effective_start.elapsed()
    }

    /// Total hashes performed across all devices.
    pub fn total_hashes(&self) -> u64 {
        self.total_hashes.load(Ordering::Relaxed)
    }

    /// Shares submitted to the pool.
    pub fn submitted_hashes(&self) -> u64 {
        self.submitted_hashes.load(Ordering::Relaxed)
    }

    /// Shares the pool has accepted.
    pub fn accepted_hashes(&self) -> u64 {
        self.accepted_hashes.load(Ordering::Relaxed)
    }

    /// Prints per-device hashrates, the total, the accepted-share percentage
    /// and a hardware snapshot.
    pub fn print_stats(&self) {
        let milliseconds = self.effective_elapsed().as_millis();
        let prefix = self.pool_prefix();

        let producers: Vec<(String, u64)> = {
            let producers = self.hash_producers.lock().unwrap();
            producers
                .iter()
                .map(|(device, hashes)| (device.clone(), hashes.load(Ordering::Relaxed)))
                .collect()
        };

        for (device, hashes) in &producers {
            if milliseconds != 0 && *hashes != 0 {
                let hashrate = 1000.0 * *hashes as f64 / milliseconds as f64;
                log::info!("{} {:<20}| {:.2} H/s", prefix, device, hashrate);
            } else {
                log::info!("{} {:<20}| N/A", prefix, device);
            }
        }

        if producers.len() > 1 {
            let total = self.total_hashes.load(Ordering::Relaxed);

            if milliseconds != 0 && total != 0 {
                let hashrate = 1000.0 * total as f64 / milliseconds as f64;
                log::info!("{} {:<20}| {:.2} H/s", prefix, "Total Hashrate", hashrate);
            } else {
                log::info!("{} {:<20}| N/A", prefix, "Total Hashrate");
            }
        }

        let accepted = self.accepted_hashes.load(Ordering::Relaxed);
        let submitted = self.submitted_hashes.load(Ordering::Relaxed);

        let mut percentage = 0.0;

        if accepted != 0 && submitted != 0 {
            percentage = (100.0 * accepted as f64 / submitted as f64).min(100.0);
        }

        log::info!("{} {:<20}| {:.2}%", prefix, "Accepted Shares", percentage);

        self.print_hardware_stats(&prefix);
    }

    fn print_hardware_stats(&self, prefix: &str) {
        let mut monitor = self.monitor.lock().unwrap();

        monitor.system.refresh_cpu_all();
        monitor.system.refresh_memory();
        monitor.components.refresh(true);

        let cpu_count = monitor.system.cpus().len().max(1);
        let cpu_usage = monitor
            .system
            .cpus()
            .iter()
            .map(|cpu| cpu.cpu_usage())
            .sum::<f32>()
            / cpu_count as f32;

        let temperature = monitor
            .components
            .iter()
            .find(|component| component.label().contains("CPU"))
            .and_then(|component| component.temperature())
            .unwrap_or(0.0);

        log::info!(
            "{} CPU: {:.1}% | Memory used: {} MB | Temp: {:.1}°C",
            prefix,
            cpu_usage,
            monitor.system.used_memory() / (1024 * 1024),
            temperature
        );
    }

    fn pool_prefix(&self) -> String {
        self.pool
            .current_pool()
            .map(|pool| pool.address())
            .unwrap_or_default()
    }
}
