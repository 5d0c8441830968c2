// src/utils/logging.rs
//! Logging configuration
//!
//! Sets up `env_logger` for the miner's console output: timestamped,
//! level-tagged lines on stdout, kept free of module paths so pool and
//! hashrate messages line up the way miners expect to read them.

use env_logger::{Builder, Target};
use log::LevelFilter;
use std::env;

/// Initializes the logging subsystem
///
/// Lines look like `[2019-11-02T17:04:23Z INFO] [pool.example.com:3333]
/// Logged in.`. The default level is Info; set `RUST_LOG` to override it,
/// for example `RUST_LOG=debug` to watch the raw pool traffic.
pub fn init_logging() {
    let mut builder = Builder::new();

    builder
        .format(|buf, record| {
            use std::io::Write;

            writeln!(
                buf,
                "[{} {}] {}",
                buf.timestamp(),
                record.level(),
                record.args()
            )
        })
        .target(Target::Stdout);

    if env::var("RUST_LOG").is_ok() {
        builder.parse_env("RUST_LOG");
    } else {
        builder.filter_level(LevelFilter::Info);
    }

    builder.init();
}
