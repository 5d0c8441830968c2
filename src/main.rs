// src/main.rs
use chukwa_miner::config::constants;
use chukwa_miner::config::{MinerConfig, Pool};
use chukwa_miner::miner::devshare::{self, DevFeeSchedule};
use chukwa_miner::miner::MinerManager;
use chukwa_miner::network::PoolCommunication;
use chukwa_miner::utils::MinerError;
use chukwa_miner::{cli, utils, HardwareConfig};
use clap::Parser;
use std::io::BufRead;
use std::sync::Arc;

/// Main entry point
///
/// Parses arguments, resolves the configuration (CLI, config file or
/// interactive prompts) and hands off to the mining loop. Configuration
/// failures exit with code 1 and a guided message.
fn main() {
    let options = cli::Options::parse();

    utils::init_logging();

    let config = match MinerConfig::resolve(&options) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config) {
        log::error!("Miner crashed with error: {}", e);
        std::process::exit(1);
    }
}

/// Wires up the pool managers and runs the dev-fee rotation forever.
fn run(config: MinerConfig) -> Result<(), MinerError> {
    let MinerConfig {
        pools,
        mut hardware_configuration,
    } = config;

    /* GPU kernels are provided by hardware-specific builds; this one carries
     * none, so enabled GPU devices cannot mine and are dropped from the
     * nonce partition. */
    if hardware_configuration.enabled_gpu_count() > 0 {
        log::warn!("No GPU kernels available in this build, disabling GPU devices");
        hardware_configuration.disable_gpus();
    }

    let hardware = Arc::new(hardware_configuration);

    print_welcome_header(&pools, &hardware);

    // Pool I/O runs on the runtime's worker threads; mining on native ones.
    let runtime = tokio::runtime::Runtime::new()?;
    let _guard = runtime.enter();

    let user_pools = PoolCommunication::new(pools);
    let dev_pools = PoolCommunication::new(dev_pools());

    let user_manager = MinerManager::new(Arc::clone(&user_pools), Arc::clone(&hardware), None, false);
    let dev_manager = MinerManager::new(Arc::clone(&dev_pools), Arc::clone(&hardware), None, true);

    spawn_keyboard_reader(Arc::clone(&user_manager));

    devshare::run_rotation(
        user_manager,
        dev_manager,
        DevFeeSchedule::new(constants::DEV_FEE_PERCENT),
    )
}

/// The development donation pool.
fn dev_pools() -> Vec<Pool> {
    vec![Pool {
        host: "donate.futuregadget.xyz".to_string(),
        port: 3333,
        username: "donate".to_string(),
        password: String::new(),
        rig_id: String::new(),
        algorithm: "turtlecoin".to_string(),
        agent: String::new(),
        login_id: String::new(),
        nice_hash: true,
        priority: 0,
        ssl: false,
        disable_auto_algo_select: true,
    }]
}

/// Prints the version, hardware and pool summary shown at startup.
fn print_welcome_header(pools: &[Pool], hardware: &HardwareConfig) {
    log::info!("* {:<22} chukwa-miner {}", "ABOUT", constants::VERSION);

    if hardware.cpu.enabled {
        log::info!("* {:<22} {}", "THREADS", hardware.cpu.thread_count);
        log::info!(
            "* {:<22} {}",
            "OPTIMIZATION",
            hardware.cpu.optimization_method
        );
    }

    for pool in pools {
        log::info!(
            "* {:<22} {}:{} ({})",
            "POOL",
            pool.host,
            pool.port,
            pool.algorithm
        );
    }

    log::info!("* {:<22} h - print hashrate", "COMMANDS");
}

/// Dispatches single-character commands typed while mining.
fn spawn_keyboard_reader(manager: Arc<MinerManager>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();

        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };

            match line.trim().chars().next() {
                Some('h') => manager.print_stats(),
                Some(_) => log::info!("Available commands: h - print hashrate"),
                None => {}
            }
        }
    });
}
