//! End-to-end mining flow with a mock GPU kernel: pool login, batched
//! kernel launches, candidate submission through the valid-hash path, and
//! hashrate accounting.

mod common;

use chukwa_miner::config::hardware::{
    CpuConfig, GpuConfig, GpuDevice, GpuVendor, HardwareConfig,
};
use chukwa_miner::miner::gpu::{
    GpuKernel, GpuKernelProvider, KernelCandidate, KernelLaunchParams,
};
use chukwa_miner::miner::MinerManager;
use chukwa_miner::network::PoolCommunication;
use chukwa_miner::types::{AlgorithmType, OptimizationMethod};
use chukwa_miner::utils::MinerError;
use common::{job_value, test_pool, MockPool, PoolEvent};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// A kernel that surfaces one passing candidate per launch.
struct AlwaysFindsKernel {
    target: u64,
}

impl GpuKernel for AlwaysFindsKernel {
    fn launch_params(&self) -> KernelLaunchParams {
        KernelLaunchParams {
            nonces_per_run: 1024,
            mem_size: 256 * 1024 * 1024,
            jobs_per_block: 4,
        }
    }

    fn init_job(
        &mut self,
        _blob: &[u8],
        _salt: &[u8],
        target: u64,
        _is_nice_hash: bool,
    ) -> Result<(), MinerError> {
        self.target = target;
        Ok(())
    }

    fn run(&mut self, start_nonce: u32) -> Result<Option<KernelCandidate>, MinerError> {
        // Slow the launch rate down to something a test can reason about
        std::thread::sleep(Duration::from_millis(5));

        // A digest whose last 8 LE bytes are zero beats any nonzero target
        Ok((self.target > 0).then(|| KernelCandidate {
            nonce: start_nonce,
            hash: [0u8; 32],
        }))
    }
}

struct AlwaysFindsProvider;

impl GpuKernelProvider for AlwaysFindsProvider {
    fn create_kernel(
        &self,
        _vendor: GpuVendor,
        _device_id: u16,
        _algorithm: AlgorithmType,
        _intensity: f32,
    ) -> Result<Box<dyn GpuKernel>, MinerError> {
        Ok(Box::new(AlwaysFindsKernel { target: 0 }))
    }
}

fn gpu_only_hardware() -> Arc<HardwareConfig> {
    Arc::new(HardwareConfig {
        cpu: CpuConfig {
            enabled: false,
            thread_count: 0,
            optimization_method: OptimizationMethod::Auto,
        },
        nvidia: GpuConfig {
            devices: vec![GpuDevice {
                enabled: true,
                name: "Mock GPU".to_string(),
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

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn gpu_candidates_flow_to_the_pool() {
    let mut mock = MockPool::spawn(job_value("J1", [0; 4], "ffff0000")).await;

    let comms = PoolCommunication::with_timings(
        vec![test_pool(mock.port, 0, "turtlecoin")],
        Duration::from_millis(10),
        Duration::from_secs(2),
    );

    let hardware = gpu_only_hardware();
    let manager = MinerManager::new(
        Arc::clone(&comms),
        Arc::clone(&hardware),
        Some(Arc::new(AlwaysFindsProvider)),
        false,
    );

    manager.start();

    // The kernel pre-filters, so every launch yields a submission carrying
    // the session id and the device's job
    let submit = mock
        .wait_for(EVENT_TIMEOUT, |event| match event {
            PoolEvent::Submit(request) => Some(request.clone()),
            _ => None,
        })
        .await;

    let params = submit.get("params").unwrap();
    assert_eq!(params["id"], "session-1");
    assert_eq!(params["job_id"], "J1");
    assert_eq!(params["result"].as_str().unwrap(), hex::encode([0u8; 32]));

    // The device checked in with its batch size
    let gpu = &hardware.nvidia.devices[0];
    assert!(gpu.checked_in.load(Ordering::Relaxed));
    assert_eq!(gpu.nonces_per_round.load(Ordering::Relaxed), 1024);

    // Whole batches are credited to the hashrate counters, and the pool's
    // acks land in the accept counter
    let hash_manager = Arc::clone(manager.hash_manager());

    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while hash_manager.total_hashes() < 1024 || hash_manager.accepted_hashes() < 1 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "accounting never caught up: {} hashes, {} accepted",
            hash_manager.total_hashes(),
            hash_manager.accepted_hashes()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(hash_manager.submitted_hashes() >= hash_manager.accepted_hashes());

    manager.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn disconnect_pauses_and_reconnect_resumes() {
    let mut mock = MockPool::spawn(job_value("J1", [0; 4], "ffff0000")).await;

    let comms = PoolCommunication::with_timings(
        vec![test_pool(mock.port, 0, "turtlecoin")],
        Duration::from_millis(10),
        Duration::from_secs(2),
    );

    let manager = MinerManager::new(
        Arc::clone(&comms),
        gpu_only_hardware(),
        Some(Arc::new(AlwaysFindsProvider)),
        false,
    );

    manager.start();

    mock.wait_for(EVENT_TIMEOUT, |event| match event {
        PoolEvent::Submit(_) => Some(()),
        _ => None,
    })
    .await;

    // Drop the connection: the client must pause, reconnect and resume
    mock.close_connection();

    mock.wait_for(EVENT_TIMEOUT, |event| match event {
        PoolEvent::Login(_) => Some(()),
        _ => None,
    })
    .await;

    mock.wait_for(EVENT_TIMEOUT, |event| match event {
        PoolEvent::Submit(_) => Some(()),
        _ => None,
    })
    .await;

    manager.stop();
}
