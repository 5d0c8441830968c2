// src/miner/manager.rs
//! The mining orchestrator
//!
//! Wires pool events to the backends and the hash manager: new jobs fan out
//! with a fresh random starting nonce, accepted shares feed the counters,
//! pool swaps resume mining (resetting share counts when the pool actually
//! changed) and disconnects pause it. Also owns the periodic stats printer.

use crate::config::constants;
use crate::config::{HardwareConfig, Pool};
use crate::miner::backend::{Backend, IncrementCallback, SubmitCallback};
use crate::miner::cpu::CpuBackend;
use crate::miner::gpu::{GpuBackend, GpuKernelProvider};
use crate::network::{Job, PoolCommunication};
use crate::stats::HashManager;
use crossbeam_channel::{RecvTimeoutError, Sender};
use rand::Rng;
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;

/// Glue between one pool manager and the compute backends
pub struct MinerManager {
    /// Self-reference handed to the pool callbacks, so a dropped manager
    /// never keeps itself alive through the pool
    weak: Weak<MinerManager>,

    pool: Arc<PoolCommunication>,
    hash_manager: Arc<HashManager>,
    hardware: Arc<HardwareConfig>,
    backends: Vec<Arc<dyn Backend>>,

    /// Algorithm of the job backends are currently on; a change clears every
    /// GPU's check-in so the partitioner reconverges
    current_algorithm: Mutex<String>,

    /// The pool we last resumed mining for
    current_pool: Mutex<Option<Pool>>,

    /// Stop channel and join handle of the running stats printer
    stats_thread: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
}

impl MinerManager {
    /// Builds the backend set from the hardware config and wraps it with a
    /// hash manager feeding the given pool
    ///
    /// # Arguments
    /// * `gpu_provider` - Kernel factory for GPU mining; `None` runs CPU-only
    /// * `is_dev_pool` - Suppresses the informational warnings for the dev
    ///   instance, which shares hardware with the user instance
    pub fn new(
        pool: Arc<PoolCommunication>,
        hardware: Arc<HardwareConfig>,
        gpu_provider: Option<Arc<dyn GpuKernelProvider>>,
        is_dev_pool: bool,
    ) -> Arc<Self> {
        let hash_manager = Arc::new(HashManager::new(Arc::clone(&pool)));

        let mut backends: Vec<Arc<dyn Backend>> = Vec::new();

        if hardware.cpu.enabled {
            let manager = Arc::clone(&hash_manager);
            let submit: SubmitCallback = Arc::new(move |job_submit| manager.submit_hash(&job_submit));

            backends.push(Arc::new(CpuBackend::new(Arc::clone(&hardware), submit)));
        } else if !is_dev_pool {
            log::warn!("CPU mining disabled.");
        }

        let enabled_gpus = hardware.enabled_gpu_count();

        match gpu_provider {
            Some(provider) if enabled_gpus > 0 => {
                let manager = Arc::clone(&hash_manager);
                let submit_valid: SubmitCallback =
                    Arc::new(move |job_submit| manager.submit_valid_hash(&job_submit));

                let manager = Arc::clone(&hash_manager);
                let increment: IncrementCallback = Arc::new(move |count, device| {
                    manager.increment_hashes_performed(count, device)
                });

                backends.push(Arc::new(GpuBackend::new(
                    Arc::clone(&hardware),
                    provider,
                    submit_valid,
                    increment,
                )));
            }
            _ => {
                if enabled_gpus > 0 && !is_dev_pool {
                    log::warn!("No GPU kernels available, not starting GPU mining");
                }
            }
        }

        Arc::new_cyclic(|weak| MinerManager {
            weak: weak.clone(),
            pool,
            hash_manager,
            hardware,
            backends,
            current_algorithm: Mutex::new(String::new()),
            current_pool: Mutex::new(None),
            stats_thread: Mutex::new(None),
        })
    }

    /// Attaches the pool callbacks and starts managing the connection
    ///
    /// Mining itself begins when the pool reports a successful login through
    /// `on_pool_swapped`. Callbacks hold weak references, so dropping the
    /// manager never leaks through the pool.
    pub fn start(&self) {
        let this = self.weak.clone();
        self.pool.on_new_job(move |job| {
            if let Some(manager) = this.upgrade() {
                manager.set_new_job(&job);
            }
        });

        let this = self.weak.clone();
        self.pool.on_hash_accepted(move |_share_id| {
            if let Some(manager) = this.upgrade() {
                manager.hash_manager.share_accepted();
            }
        });

        let this = self.weak.clone();
        self.pool.on_pool_swapped(move |new_pool| {
            let Some(manager) = this.upgrade() else {
                return;
            };

            {
                let mut current = manager.current_pool.lock().unwrap();

                /* New pool: the accepted/submitted counts no longer apply */
                if current.as_ref() != Some(&new_pool) {
                    manager.hash_manager.reset_share_count();
                }

                *current = Some(new_pool);
            }

            manager.resume_mining();
        });

        let this = self.weak.clone();
        self.pool.on_pool_disconnected(move || {
            if let Some(manager) = this.upgrade() {
                manager.pause_mining();
            }
        });

        self.pool.start_managing();
    }

    /// Fans a new job out to every backend with a fresh starting nonce
    ///
    /// An algorithm change clears every GPU's check-in flag first, forcing
    /// the nonce partitioner to reconverge on the new batch sizes.
    pub fn set_new_job(&self, job: &Job) {
        {
            let mut current = self.current_algorithm.lock().unwrap();

            if *current != job.algorithm {
                *current = job.algorithm.clone();
                self.hardware.reset_gpu_check_ins();
            }
        }

        let nonce = rand::thread_rng().gen::<u32>();

        for backend in &self.backends {
            backend.set_new_job(job.clone(), nonce);
        }

        log::info!(
            "{} New job, diff {}",
            self.pool_prefix(),
            job.share_difficulty
        );
    }

    /// Starts every backend on the pool's current job and launches the stats
    /// printer.
    pub fn resume_mining(&self) {
        if self.stats_thread.lock().unwrap().is_some() {
            self.pause_mining();
        }

        log::info!("Resuming mining.");

        let Some(job) = self.pool.get_job() else {
            log::warn!("No job to mine yet, waiting for the pool");
            return;
        };

        log::info!(
            "{} New job, diff {}",
            self.pool_prefix(),
            job.share_difficulty
        );

        // The first job after a (re)connect also fixes the algorithm the
        // check-in tracking compares against
        *self.current_algorithm.lock().unwrap() = job.algorithm.clone();

        let nonce = rand::thread_rng().gen::<u32>();

        for backend in &self.backends {
            backend.start(job.clone(), nonce);
        }

        self.start_stats_printer();
    }

    /// Stops the backends, freezes the hashrate clock and joins the printer.
    pub fn pause_mining(&self) {
        log::info!("Pausing mining.");

        for backend in &self.backends {
            backend.stop();
        }

        self.hash_manager.pause();
        self.stop_stats_printer();
    }

    /// Full stop: backends, printer, and the pool connection.
    pub fn stop(&self) {
        for backend in &self.backends {
            backend.stop();
        }

        self.hash_manager.pause();
        self.stop_stats_printer();
        self.pool.logout();
    }

    /// Prints the current stats on demand (the `h` key).
    pub fn print_stats(&self) {
        self.hash_manager.print_stats();

        for backend in &self.backends {
            for stats in backend.performance_stats() {
                log::debug!(
                    "{} consumes {} nonces per round",
                    stats.device,
                    stats.nonces_per_round
                );
            }
        }
    }

    /// The hash manager backing this miner. Exposed for the wire-up of tests
    /// and the keyboard interface.
    pub fn hash_manager(&self) -> &Arc<HashManager> {
        &self.hash_manager
    }

    fn start_stats_printer(&self) {
        let (stop_sender, stop_receiver) = crossbeam_channel::bounded::<()>(1);
        let hash_manager = Arc::clone(&self.hash_manager);

        let handle = std::thread::spawn(move || {
            hash_manager.start();

            loop {
                match stop_receiver.recv_timeout(constants::STATS_PRINT_INTERVAL) {
                    Err(RecvTimeoutError::Timeout) => hash_manager.print_stats(),
                    // Stop requested, or the manager went away
                    _ => break,
                }
            }
        });

        *self.stats_thread.lock().unwrap() = Some((stop_sender, handle));
    }

    fn stop_stats_printer(&self) {
        if let Some((stop_sender, handle)) = self.stats_thread.lock().unwrap().take() {
            let _ = stop_sender.send(());
            drop(stop_sender);
            let _ = handle.join();
        }
    }

    fn pool_prefix(&self) -> String {
        self.pool
            .current_pool()
            .map(|pool| pool.address())
            .unwrap_or_default()
    }
}

impl Drop for MinerManager {
    fn drop(&mut self) {
        for backend in &self.backends {
            backend.stop();
        }

        self.stop_stats_printer();
    }
}
