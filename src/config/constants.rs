// src/config/constants.rs
//! Protocol timing and dev-fee constants

use std::time::Duration;

/// Miner version, exposed to pools through the user agent string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How many connect/login attempts to make against one pool before moving on
/// to the next preference.
pub const MAX_LOGIN_ATTEMPTS: u32 = 5;

/// Delay between login attempts against the same pool.
pub const POOL_LOGIN_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Application-layer ping interval while connected.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(120);

/// How long the pool manager sleeps between preference scans while connected.
pub const POOL_SCAN_INTERVAL: Duration = Duration::from_secs(5);

/// How often the stats printer wakes while mining.
pub const STATS_PRINT_INTERVAL: Duration = Duration::from_secs(20);

/// Percentage of each mining cycle donated to the development pool.
/// `180 * DEV_FEE_PERCENT` seconds out of every 300 minutes.
pub const DEV_FEE_PERCENT: f64 = 1.0;

/// Length of one user/dev mining cycle.
pub const CYCLE_LENGTH: Duration = Duration::from_secs(300 * 60);

/// The default user agent sent to pools.
pub fn default_agent() -> String {
    format!("chukwa-miner/{}", VERSION)
}
