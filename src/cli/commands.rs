// src/cli/commands.rs
use crate::types::AlgorithmType;
use clap::Parser;
use std::path::PathBuf;

/// Chukwa Miner - Argon2/Chukwa pool mining client
///
/// When pool arguments are given they take precedence over the config file;
/// with no arguments an existing config file is used, and if neither is
/// available the miner prompts interactively and writes the answers out.
#[derive(Parser, Debug)]
#[command(name = "chukwa-miner")]
#[command(version, about, long_about = None)]
pub struct Options {
    /// The pool <host:port> combination to mine to
    #[arg(long, value_name = "host:port")]
    pub pool: Option<String>,

    /// The username to use with the pool, normally your wallet address
    #[arg(long)]
    pub username: Option<String>,

    /// The password to use with the pool
    #[arg(long)]
    pub password: Option<String>,

    /// The rig ID to use with the pool
    #[arg(long)]
    pub rigid: Option<String>,

    /// Use SSL/TLS when connecting to this pool
    #[arg(long)]
    pub ssl: bool,

    /// The mining algorithm to use
    #[arg(long)]
    pub algorithm: Option<AlgorithmType>,

    /// Number of CPU threads to mine with
    #[arg(long)]
    pub threads: Option<u32>,

    /// Disable CPU mining
    #[arg(long = "disableCPU")]
    pub disable_cpu: bool,

    /// Disable mining on NVIDIA GPUs
    #[arg(long = "disableNVIDIA")]
    pub disable_nvidia: bool,

    /// Disable mining on AMD GPUs
    #[arg(long = "disableAMD")]
    pub disable_amd: bool,

    /// The location of the config file to use
    #[arg(long, value_name = "file", default_value = "config.json")]
    pub config: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_flags_parse() {
        let options = Options::parse_from([
            "chukwa-miner",
            "--pool",
            "pool.example.com:3333",
            "--username",
            "wallet",
            "--ssl",
            "--threads",
            "8",
            "--disableNVIDIA",
        ]);

        assert_eq!(options.pool.as_deref(), Some("pool.example.com:3333"));
        assert_eq!(options.username.as_deref(), Some("wallet"));
        assert!(options.ssl);
        assert_eq!(options.threads, Some(8));
        assert!(options.disable_nvidia);
        assert!(!options.disable_amd);
        assert_eq!(options.config, PathBuf::from("config.json"));
    }

    #[test]
    fn test_algorithm_aliases() {
        let options =
            Options::parse_from(["chukwa-miner", "--algorithm", "turtlecoin"]);
        assert_eq!(options.algorithm, Some(AlgorithmType::ChukwaV2));
    }
}
