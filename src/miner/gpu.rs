// src/miner/gpu.rs
//! GPU mining backend
//!
//! One worker per enabled device. Each worker owns its kernel state,
//! reallocating it on every algorithm change and publishing the kernel's
//! batch size to the nonce partitioner. The kernel itself enumerates a full
//! batch of nonces per launch and pre-filters candidates, so workers submit
//! through the valid-hash path and credit whole batches to the hashrate
//! counters.

use crate::config::hardware::{DeviceSelector, GpuVendor, HardwareConfig, NonceInfo};
use crate::miner::backend::{
    Backend, IncrementCallback, JobSubmit, PerformanceStats, SubmitCallback,
};
use crate::network::Job;
use crate::types::AlgorithmType;
use crate::utils::error::MinerError;
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Sizing and batch parameters of an allocated kernel
#[derive(Debug, Clone, Copy)]
pub struct KernelLaunchParams {
    /// How many nonces one launch consumes
    pub nonces_per_run: u32,

    /// Bytes of device memory backing the kernel state
    pub mem_size: u64,

    /// Hashing jobs packed into one block
    pub jobs_per_block: u32,
}

/// A candidate surfaced by a kernel launch
#[derive(Debug, Clone)]
pub struct KernelCandidate {
    /// The nonce that beat the target
    pub nonce: u32,

    /// Its digest
    pub hash: [u8; 32],
}

/// Allocated per-device kernel state
///
/// A kernel is created per algorithm change, told about each job, and then
/// launched repeatedly with the batch's starting nonce.
pub trait GpuKernel: Send {
    /// The parameters this kernel was allocated with
    fn launch_params(&self) -> KernelLaunchParams;

    /// Uploads a new job: the blob, its salt, the target and the nicehash
    /// flag (which restricts which nonce bytes the kernel may vary)
    fn init_job(
        &mut self,
        blob: &[u8],
        salt: &[u8],
        target: u64,
        is_nice_hash: bool,
    ) -> Result<(), MinerError>;

    /// Runs one batch starting at `start_nonce`, returning a candidate that
    /// beat the target, if any
    fn run(&mut self, start_nonce: u32) -> Result<Option<KernelCandidate>, MinerError>;
}

/// Creates kernel state for a device and algorithm
///
/// Injected into the backend so the hardware-specific kernels stay outside
/// the coordination engine; tests supply mocks.
pub trait GpuKernelProvider: Send + Sync {
    /// Allocates kernel state sized by the algorithm's memory and iteration
    /// parameters, scaled by `intensity`
    fn create_kernel(
        &self,
        vendor: GpuVendor,
        device_id: u16,
        algorithm: AlgorithmType,
        intensity: f32,
    ) -> Result<Box<dyn GpuKernel>, MinerError>;
}

/// Identifies one enabled device and its position in the hardware config
#[derive(Clone)]
struct WorkerDevice {
    vendor: GpuVendor,
    /// Index into the vendor's device list
    index: usize,
    id: u16,
    label: String,
    intensity: f32,
    desktop_lag: f32,
}

struct SharedState {
    current_job: ArcSwap<Option<Job>>,
    base_nonce: AtomicU32,
    should_stop: AtomicBool,
    new_job_available: Vec<AtomicBool>,
}

/// GPU mining backend wrapping all enabled devices
pub struct GpuBackend {
    hardware: Arc<HardwareConfig>,
    provider: Arc<dyn GpuKernelProvider>,
    submit_valid_hash: SubmitCallback,
    increment_hashes: IncrementCallback,
    devices: Vec<WorkerDevice>,
    state: Arc<SharedState>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl GpuBackend {
    /// Creates the backend over every enabled GPU in the hardware config
    ///
    /// # Arguments
    /// * `provider` - Allocates per-device kernel state
    /// * `submit_valid_hash` - Receives candidates the kernel already
    ///   validated against the target
    /// * `increment_hashes` - Credits each launched batch to the device
    pub fn new(
        hardware: Arc<HardwareConfig>,
        provider: Arc<dyn GpuKernelProvider>,
        submit_valid_hash: SubmitCallback,
        increment_hashes: IncrementCallback,
    ) -> Self {
        let mut devices = Vec::new();

        for (vendor, list) in [
            (GpuVendor::Nvidia, &hardware.nvidia.devices),
            (GpuVendor::Amd, &hardware.amd.devices),
        ] {
            for (index, gpu) in list.iter().enumerate().filter(|(_, gpu)| gpu.enabled) {
                devices.push(WorkerDevice {
                    vendor,
                    index,
                    id: gpu.id,
                    label: gpu.label(),
                    intensity: gpu.intensity,
                    desktop_lag: gpu.desktop_lag,
                });
            }
        }

        let worker_count = devices.len();

        GpuBackend {
            hardware,
            provider,
            submit_valid_hash,
            increment_hashes,
            devices,
            state: Arc::new(SharedState {
                current_job: ArcSwap::from_pointee(None),
                base_nonce: AtomicU32::new(0),
                should_stop: AtomicBool::new(false),
                new_job_available: (0..worker_count).map(|_| AtomicBool::new(false)).collect(),
            }),
            threads: Mutex::new(Vec::new()),
        }
    }
}

impl Backend for GpuBackend {
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

        for (worker_index, device) in self.devices.iter().enumerate() {
            let lag = gpu_lag_microseconds(device.desktop_lag);

            log::info!(
                "[{}] Intensity: {}, Desktop Lag: {}. Sleeping for {} microseconds between kernel launches",
                device.label,
                device.intensity,
                device.desktop_lag,
                lag
            );

            let context = WorkerContext {
                state: Arc::clone(&self.state),
                hardware: Arc::clone(&self.hardware),
                provider: Arc::clone(&self.provider),
                submit_valid_hash: Arc::clone(&self.submit_valid_hash),
                increment_hashes: Arc::clone(&self.increment_hashes),
                device: device.clone(),
                worker_index,
            };

            threads.push(std::thread::spawn(move || hash_worker(context)));
        }
    }

    fn stop(&self) {
        self.state.should_stop.store(true, Ordering::Release);

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
        self.devices
            .iter()
            .map(|device| {
                let nonces_per_round = match device.vendor {
                    GpuVendor::Nvidia => &self.hardware.nvidia.devices[device.index],
                    GpuVendor::Amd => &self.hardware.amd.devices[device.index],
                }
                .nonces_per_round
                .load(Ordering::Relaxed);

                PerformanceStats {
                    device: device.label.clone(),
                    nonces_per_round,
                }
            })
            .collect()
    }
}

impl Drop for GpuBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Inter-launch sleep in microseconds for a desktop-lag setting
///
/// A concave curve: 100 means no sleep, lower values sleep exponentially
/// longer so the desktop stays responsive.
fn gpu_lag_microseconds(desktop_lag: f32) -> u32 {
    (45.0 * (2f64.powf((100.0 - desktop_lag as f64) * 0.2) - 1.0)) as u32
}

struct WorkerContext {
    state: Arc<SharedState>,
    hardware: Arc<HardwareConfig>,
    provider: Arc<dyn GpuKernelProvider>,
    submit_valid_hash: SubmitCallback,
    increment_hashes: IncrementCallback,
    device: WorkerDevice,
    worker_index: usize,
}

/// One device worker
///
/// Reallocates kernel state on algorithm changes, publishing the new batch
/// size and check-in before re-querying the partitioner. A single launch
/// failure is tolerated; a second consecutive failure retires this device
/// without affecting the rest of the process.
fn hash_worker(context: WorkerContext) {
    let WorkerContext {
        state,
        hardware,
        provider,
        submit_valid_hash,
        increment_hashes,
        device,
        worker_index,
    } = context;

    let selector = DeviceSelector::gpu(device.vendor, device.id);
    let gpu_lag = gpu_lag_microseconds(device.desktop_lag);

    let mut kernel: Option<Box<dyn GpuKernel>> = None;
    let mut nonces_per_run = 0u32;
    let mut current_algorithm = String::new();
    let mut nonce_info = NonceInfo::default();
    let mut failed_last_launch = false;

    while !state.should_stop.load(Ordering::Acquire) {
        let Some(job) = (*state.current_job.load_full()).clone() else {
            std::thread::sleep(Duration::from_millis(50));
            continue;
        };

        // New algorithm: free the old kernel state and allocate afresh
        if job.algorithm != current_algorithm {
            kernel = None;

            let algorithm: AlgorithmType = match job.algorithm.parse() {
                Ok(algorithm) => algorithm,
                Err(e) => {
                    log::warn!("{} cannot mine this job: {}", device.label, e);
                    wait_for_new_job(&state, worker_index);
                    continue;
                }
            };

            let allocated = match provider.create_kernel(
                device.vendor,
                device.id,
                algorithm,
                device.intensity,
            ) {
                Ok(kernel) => kernel,
                Err(e) => {
                    log::warn!("Failed to allocate kernel state on {}: {}", device.label, e);
                    log::warn!("Stopping mining on {}", device.label);
                    return;
                }
            };

            let params = allocated.launch_params();

            log::info!(
                "[{}] Allocating {:.2}GB of GPU memory. Performing {} nonces per kernel launch, with {} jobs per block.",
                device.label,
                params.mem_size as f64 / (1024.0 * 1024.0 * 1024.0),
                params.nonces_per_run,
                params.jobs_per_block
            );

            nonces_per_run = params.nonces_per_run;

            // Publish our contribution, then realign with everyone else
            let gpu = match device.vendor {
                GpuVendor::Nvidia => &hardware.nvidia.devices[device.index],
                GpuVendor::Amd => &hardware.amd.devices[device.index],
            };
            gpu.nonces_per_round.store(params.nonces_per_run, Ordering::Release);
            gpu.checked_in.store(true, Ordering::Release);

            nonce_info = hardware.nonce_offset_info(selector);
            current_algorithm = job.algorithm.clone();
            kernel = Some(allocated);
        }

        let Some(active_kernel) = kernel.as_mut() else {
            continue;
        };

        let base_nonce = state.base_nonce.load(Ordering::Acquire);

        if let Err(e) =
            active_kernel.init_job(&job.raw_blob, job.salt(), job.target, job.is_nice_hash)
        {
            log::warn!("Failed to upload job to {}: {}", device.label, e);
            log::warn!("Stopping mining on {}", device.label);
            return;
        }

        let mut i: u32 = 0;

        while !state.new_job_available[worker_index].load(Ordering::Acquire) {
            let our_nonce = base_nonce
                .wrapping_add(i.wrapping_mul(nonce_info.nonces_per_round))
                .wrapping_add(nonce_info.nonce_offset);

            match active_kernel.run(our_nonce) {
                Ok(candidate) => {
                    // Credit the whole batch so the hashrate printer is
                    // accurate
                    increment_hashes(nonces_per_run, &device.label);

                    if let Some(candidate) = candidate {
                        submit_valid_hash(JobSubmit {
                            hash: candidate.hash,
                            job_id: job.job_id.clone(),
                            nonce: candidate.nonce,
                            target: job.target,
                            hardware: device.label.clone(),
                        });
                    }

                    if gpu_lag > 0 {
                        std::thread::sleep(Duration::from_micros(gpu_lag as u64));
                    }

                    failed_last_launch = false;
                }
                Err(e) => {
                    log::warn!("Caught unexpected error from GPU hasher: {}", e);

                    /* One non-sticky failure is recoverable. A second
                     * consecutive one retires this device; the process and
                     * the other workers keep going. */
                    if failed_last_launch {
                        log::warn!("Stopping mining on {}", device.label);
                        return;
                    }

                    failed_last_launch = true;
                }
            }

            i = i.wrapping_add(1);

            if !nonce_info.all_hardware_initialized {
                nonce_info = hardware.nonce_offset_info(selector);
            }
        }

        // Switch to the new job
        state.new_job_available[worker_index].store(false, Ordering::Release);
    }
}

fn wait_for_new_job(state: &SharedState, worker_index: usize) {
    while !state.new_job_available[worker_index].load(Ordering::Acquire)
        && !state.should_stop.load(Ordering::Acquire)
    {
        std::thread::sleep(Duration::from_millis(100));
    }

    state.new_job_available[worker_index].store(false, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::hardware::{CpuConfig, GpuConfig, GpuDevice};
    use crate::network::protocol::NONCE_OFFSET;
    use crate::types::OptimizationMethod;
    use crossbeam_channel::{unbounded, Receiver, Sender};
    use std::sync::atomic::AtomicUsize;

    /// A kernel that reports a fixed batch size, surfaces a candidate on
    /// every launch, and can be scripted to fail.
    struct MockKernel {
        params: KernelLaunchParams,
        launches: Sender<u32>,
        failures: Arc<AtomicUsize>,
    }

    impl GpuKernel for MockKernel {
        fn launch_params(&self) -> KernelLaunchParams {
            self.params
        }

        fn init_job(
            &mut self,
            _blob: &[u8],
            _salt: &[u8],
            _target: u64,
            _is_nice_hash: bool,
        ) -> Result<(), MinerError> {
            Ok(())
        }

        fn run(&mut self, start_nonce: u32) -> Result<Option<KernelCandidate>, MinerError> {
            if self.failures.load(Ordering::Relaxed) > 0 {
                self.failures.fetch_sub(1, Ordering::Relaxed);
                return Err(MinerError::BackendError("scripted launch failure".to_string()));
            }

            let _ = self.launches.send(start_nonce);

            Ok(Some(KernelCandidate {
                nonce: start_nonce,
                hash: [0u8; 32],
            }))
        }
    }

    struct MockProvider {
        nonces_per_run: u32,
        launches: Sender<u32>,
        failures: Arc<AtomicUsize>,
        created: Arc<AtomicUsize>,
    }

    impl GpuKernelProvider for MockProvider {
        fn create_kernel(
            &self,
            _vendor: GpuVendor,
            _device_id: u16,
            _algorithm: AlgorithmType,
            _intensity: f32,
        ) -> Result<Box<dyn GpuKernel>, MinerError> {
            self.created.fetch_add(1, Ordering::Relaxed);

            Ok(Box::new(MockKernel {
                params: KernelLaunchParams {
                    nonces_per_run: self.nonces_per_run,
                    mem_size: 512 * 1024 * 1024,
                    jobs_per_block: 8,
                },
                launches: self.launches.clone(),
                failures: Arc::clone(&self.failures),
            }))
        }
    }

    fn test_hardware() -> Arc<HardwareConfig> {
        Arc::new(HardwareConfig {
            cpu: CpuConfig {
                enabled: false,
                thread_count: 0,
                optimization_method: OptimizationMethod::Auto,
            },
            nvidia: GpuConfig {
                devices: vec![GpuDevice {
                    enabled: true,
                    name: "Test GPU".to_string(),
                    id: 0,
                    intensity: 100.0,
                    desktop_lag: 100.0,
                    checked_in: AtomicBool::new(false),
                    nonces_per_round: AtomicU32::new(0),
                }],
            },
            amd: GpuConfig::default(),
        })
    }

    fn test_job(job_id: &str) -> Job {
        let mut raw_blob = vec![0u8; 76];
        raw_blob[NONCE_OFFSET] = 0;

        Job {
            raw_blob,
            job_id: job_id.to_string(),
            target: 0x0000_ffff_0000_0000,
            share_difficulty: 65536,
            algorithm: "turtlecoin".to_string(),
            is_nice_hash: false,
        }
    }

    struct Rig {
        backend: GpuBackend,
        launches: Receiver<u32>,
        submissions: Receiver<JobSubmit>,
        increments: Receiver<(u32, String)>,
        created: Arc<AtomicUsize>,
        failures: Arc<AtomicUsize>,
    }

    fn rig(nonces_per_run: u32, scripted_failures: usize) -> Rig {
        let (launch_tx, launches) = unbounded();
        let (submit_tx, submissions) = unbounded();
        let (increment_tx, increments) = unbounded();

        let failures = Arc::new(AtomicUsize::new(scripted_failures));
        let created = Arc::new(AtomicUsize::new(0));

        let provider = Arc::new(MockProvider {
            nonces_per_run,
            launches: launch_tx,
            failures: Arc::clone(&failures),
            created: Arc::clone(&created),
        });

        let submit: SubmitCallback = Arc::new(move |submission| {
            let _ = submit_tx.send(submission);
        });

        let increments_sender = increment_tx;
        let increment: IncrementCallback = Arc::new(move |count, device| {
            let _ = increments_sender.send((count, device.to_string()));
        });

        Rig {
            backend: GpuBackend::new(test_hardware(), provider, submit, increment),
            launches,
            submissions,
            increments,
            created,
            failures,
        }
    }

    const RECV_TIMEOUT: Duration = Duration::from_secs(10);

    #[test]
    fn test_kernel_checks_in_and_registers_batch_size() {
        let rig = rig(4096, 0);

        rig.backend.start(test_job("J1"), 1000);

        // Wait for the first launch; by then the device has checked in
        let first = rig.launches.recv_timeout(RECV_TIMEOUT).unwrap();

        let gpu = &rig.backend.hardware.nvidia.devices[0];
        assert!(gpu.checked_in.load(Ordering::Relaxed));
        assert_eq!(gpu.nonces_per_round.load(Ordering::Relaxed), 4096);

        // Sole device: offset 0, stride = its own batch size
        assert_eq!(first, 1000);
        let second = rig.launches.recv_timeout(RECV_TIMEOUT).unwrap();
        assert_eq!(second, 1000 + 4096);

        rig.backend.stop();
    }

    #[test]
    fn test_batches_are_credited_and_candidates_submitted() {
        let rig = rig(2048, 0);

        rig.backend.start(test_job("J1"), 0);

        let (count, device) = rig.increments.recv_timeout(RECV_TIMEOUT).unwrap();
        assert_eq!(count, 2048);
        assert_eq!(device, "Test GPU-0");

        let submission = rig.submissions.recv_timeout(RECV_TIMEOUT).unwrap();
        assert_eq!(submission.job_id, "J1");
        assert_eq!(submission.hardware, "Test GPU-0");

        rig.backend.stop();
    }

    #[test]
    fn test_single_failure_is_forgiven() {
        let rig = rig(64, 1);

        rig.backend.start(test_job("J1"), 0);

        // The worker survives the scripted failure and keeps launching
        assert!(rig.launches.recv_timeout(RECV_TIMEOUT).is_ok());
        assert!(rig.launches.recv_timeout(RECV_TIMEOUT).is_ok());
        assert_eq!(rig.failures.load(Ordering::Relaxed), 0);

        rig.backend.stop();
    }

    #[test]
    fn test_two_consecutive_failures_retire_the_worker() {
        let rig = rig(64, 2);

        rig.backend.start(test_job("J1"), 0);

        // The worker dies before its first successful launch
        assert!(rig.launches.recv_timeout(Duration::from_secs(2)).is_err());

        // And stays dead; stop still works
        rig.backend.stop();
        assert!(rig.launches.try_recv().is_err());
    }

    #[test]
    fn test_algorithm_change_reallocates_kernel() {
        let rig = rig(64, 0);

        rig.backend.start(test_job("J1"), 0);
        rig.launches.recv_timeout(RECV_TIMEOUT).unwrap();
        assert_eq!(rig.created.load(Ordering::Relaxed), 1);

        let mut next = test_job("J2");
        next.algorithm = "chukwa".to_string();

        // The orchestrator clears check-ins on algorithm changes
        rig.backend.hardware.reset_gpu_check_ins();
        rig.backend.set_new_job(next, 0);

        // Wait until launches resume under the new kernel
        let deadline = std::time::Instant::now() + RECV_TIMEOUT;
        while rig.created.load(Ordering::Relaxed) < 2 {
            assert!(std::time::Instant::now() < deadline, "kernel never reallocated");
            std::thread::sleep(Duration::from_millis(10));
        }

        assert!(rig
            .backend
            .hardware
            .nvidia
            .devices[0]
            .checked_in
            .load(Ordering::Relaxed));

        rig.backend.stop();
    }
}
