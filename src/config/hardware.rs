// src/config/hardware.rs
//! Hardware configuration and the nonce partitioner
//!
//! The hardware config is shared between the orchestrator and every worker
//! thread. Each device's per-round nonce contribution and its check-in flag
//! are atomics: GPU workers publish them when they allocate kernel state for
//! a new algorithm, and every worker reads them when asking the partitioner
//! for its slice of the nonce space.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::types::OptimizationMethod;

/// CPU mining configuration
#[derive(Debug, Serialize, Deserialize)]
pub struct CpuConfig {
    /// Is CPU mining enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Number of hashing threads to spawn
    #[serde(default = "default_thread_count", rename = "threadCount")]
    pub thread_count: u32,

    /// Optimisation hint passed to the algorithm constructor
    #[serde(default, rename = "optimizationMethod")]
    pub optimization_method: OptimizationMethod,
}

impl Default for CpuConfig {
    fn default() -> Self {
        CpuConfig {
            enabled: true,
            thread_count: default_thread_count(),
            optimization_method: OptimizationMethod::Auto,
        }
    }
}

/// A single GPU available for mining
///
/// `checked_in` and `nonces_per_round` are runtime state, re-established on
/// every algorithm change; they are never persisted.
#[derive(Debug, Serialize, Deserialize)]
pub struct GpuDevice {
    /// Is this device enabled for mining
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Display name of the device
    pub name: String,

    /// Zero-indexed device id within its vendor
    pub id: u16,

    /// Multiplier deciding how much memory / how many threads to launch, 0-100
    #[serde(default = "default_full")]
    pub intensity: f32,

    /// How aggressively to sleep between kernel launches, 0-100.
    /// Higher values keep the desktop responsive at the cost of hashrate.
    #[serde(default = "default_full", rename = "desktopLag")]
    pub desktop_lag: f32,

    /// Has this device reported its per-round nonce count for the current
    /// algorithm. While false, workers must re-query the partitioner.
    #[serde(skip)]
    pub checked_in: AtomicBool,

    /// How many nonces this device consumes per kernel launch
    #[serde(skip)]
    pub nonces_per_round: AtomicU32,
}

impl GpuDevice {
    /// The label used for this device in hashrate output, e.g. `GTX 1070-0`.
    pub fn label(&self) -> String {
        format!("{}-{}", self.name, self.id)
    }
}

/// Per-vendor list of GPU devices
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GpuConfig {
    /// The devices belonging to this vendor
    #[serde(default)]
    pub devices: Vec<GpuDevice>,
}

/// GPU vendor, which decides a device's position in the canonical order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuVendor {
    /// NVIDIA devices come before AMD ones
    Nvidia,
    /// AMD devices come last
    Amd,
}

/// Identifies one compute device when querying the nonce partitioner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSelector {
    /// The CPU backend (all threads collectively)
    Cpu,
    /// An NVIDIA device by id
    Nvidia(u16),
    /// An AMD device by id
    Amd(u16),
}

impl DeviceSelector {
    /// The selector for a GPU device.
    pub fn gpu(vendor: GpuVendor, id: u16) -> Self {
        match vendor {
            GpuVendor::Nvidia => DeviceSelector::Nvidia(id),
            GpuVendor::Amd => DeviceSelector::Amd(id),
        }
    }
}

/// A device's slice of the shared nonce space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceInfo {
    /// Total nonces consumed per round across all enabled devices
    pub nonces_per_round: u32,

    /// Sum of the per-round counts of enabled devices preceding this one in
    /// the canonical order
    pub nonce_offset: u32,

    /// False while any enabled device has not reported its per-round count
    /// for the current algorithm. Workers re-query every round until true.
    pub all_hardware_initialized: bool,
}

impl Default for NonceInfo {
    fn default() -> Self {
        NonceInfo {
            nonces_per_round: 0,
            nonce_offset: 0,
            all_hardware_initialized: true,
        }
    }
}

/// The full hardware configuration, shared across backends
///
/// Canonical device order for nonce partitioning: CPU threads first, then
/// NVIDIA devices in id order, then AMD devices in id order.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// CPU configuration
    #[serde(default)]
    pub cpu: CpuConfig,

    /// NVIDIA devices
    #[serde(default)]
    pub nvidia: GpuConfig,

    /// AMD devices
    #[serde(default)]
    pub amd: GpuConfig,
}

impl HardwareConfig {
    /// Computes the querying device's slice of the nonce space
    ///
    /// Walks the canonical order, summing every enabled device's per-round
    /// count; counts before the queried device also accumulate into the
    /// offset. Any enabled GPU that has not checked in for the current
    /// algorithm clears `all_hardware_initialized`, which tells workers to
    /// keep re-querying until the partition converges.
    pub fn nonce_offset_info(&self, selector: DeviceSelector) -> NonceInfo {
        let mut info = NonceInfo::default();
        let mut found_our_device = false;

        if self.cpu.enabled {
            // CPU processes one nonce per round, per thread
            info.nonces_per_round += self.cpu.thread_count;

            if selector == DeviceSelector::Cpu {
                found_our_device = true;
            } else {
                info.nonce_offset += self.cpu.thread_count;
            }
        }

        for (devices, select) in [
            (&self.nvidia.devices, DeviceSelector::Nvidia as fn(u16) -> DeviceSelector),
            (&self.amd.devices, DeviceSelector::Amd as fn(u16) -> DeviceSelector),
        ] {
            for gpu in devices.iter().filter(|gpu| gpu.enabled) {
                let per_round = gpu.nonces_per_round.load(Ordering::Relaxed);

                info.nonces_per_round += per_round;

                /* Each GPU needs to check in with its per-round count after
                 * an algorithm change; until then offsets may be stale, so
                 * callers keep fetching fresh ones. */
                if !gpu.checked_in.load(Ordering::Relaxed) {
                    info.all_hardware_initialized = false;
                }

                if selector == select(gpu.id) {
                    found_our_device = true;
                } else if !found_our_device {
                    info.nonce_offset += per_round;
                }
            }
        }

        info
    }

    /// Clears every enabled GPU's check-in flag
    ///
    /// Called on algorithm change so the partitioner reconverges before the
    /// cached offsets are trusted again.
    pub fn reset_gpu_check_ins(&self) {
        for gpu in self
            .nvidia
            .devices
            .iter()
            .chain(self.amd.devices.iter())
            .filter(|gpu| gpu.enabled)
        {
            gpu.checked_in.store(false, Ordering::Relaxed);
        }
    }

    /// Number of GPUs enabled for mining across both vendors.
    pub fn enabled_gpu_count(&self) -> usize {
        self.nvidia
            .devices
            .iter()
            .chain(self.amd.devices.iter())
            .filter(|gpu| gpu.enabled)
            .count()
    }

    /// Disables every GPU device. Used when no kernel provider is available.
    pub fn disable_gpus(&mut self) {
        for gpu in self
            .nvidia
            .devices
            .iter_mut()
            .chain(self.amd.devices.iter_mut())
        {
            gpu.enabled = false;
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_full() -> f32 {
    100.0
}

fn default_thread_count() -> u32 {
    num_cpus::get() as u32
}
