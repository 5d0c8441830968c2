// src/config/config.rs
use crate::cli::Options;
use crate::config::constants;
use crate::config::hardware::HardwareConfig;
use crate::types::AlgorithmType;
use crate::utils::error::MinerError;
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

/// A mining pool endpoint and its credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    /// Host of the pool
    pub host: String,

    /// Port of the pool
    pub port: u16,

    /// Username to login with, normally a wallet address
    pub username: String,

    /// Optional password to login with
    #[serde(default)]
    pub password: String,

    /// Optional rig identifier
    #[serde(default, rename = "rigID")]
    pub rig_id: String,

    /// The mining algorithm to use with this pool
    pub algorithm: String,

    /// Custom user agent
    #[serde(default)]
    pub agent: String,

    /// The identifier the pool assigned us at login. Set iff logged in.
    #[serde(skip)]
    pub login_id: String,

    /// Whether to use nicehash style nonces
    #[serde(default, rename = "niceHash")]
    pub nice_hash: bool,

    /// The priority of this pool in the list of pools; lower is preferred
    #[serde(default)]
    pub priority: usize,

    /// Does this pool require TLS for connecting
    #[serde(default)]
    pub ssl: bool,

    /// Disable automatically selecting the algorithm from the pool job data.
    /// This may be desired if the pool is returning the incorrect value.
    #[serde(default, rename = "disableAutoAlgoSelect")]
    pub disable_auto_algo_select: bool,
}

impl Pool {
    /// The user agent to present to this pool.
    pub fn agent(&self) -> String {
        if self.agent.is_empty() {
            constants::default_agent()
        } else {
            self.agent.clone()
        }
    }

    /// `[host:port]` prefix used for log lines about this pool.
    pub fn address(&self) -> String {
        format!("[{}:{}]", self.host, self.port)
    }

    /// Checks that this pool's algorithm name is known.
    pub fn validate(&self) -> Result<(), MinerError> {
        if !AlgorithmType::is_supported(&self.algorithm) {
            return Err(MinerError::ConfigError(format!(
                "Algorithm \"{}\" is not a known algorithm!",
                self.algorithm
            )));
        }

        Ok(())
    }
}

/// Pool identity: everything except `niceHash`, `priority` and
/// `disableAutoAlgoSelect`, which can differ between reconfigurations of the
/// same pool.
impl PartialEq for Pool {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host
            && self.port == other.port
            && self.username == other.username
            && self.password == other.password
            && self.rig_id == other.rig_id
            && self.algorithm == other.algorithm
            && self.agent == other.agent
            && self.login_id == other.login_id
            && self.ssl == other.ssl
    }
}

impl Eq for Pool {}

/// The persisted miner configuration (`config.json`)
#[derive(Debug, Serialize, Deserialize)]
pub struct MinerConfig {
    /// The pools to mine to, in no particular order; `priority` decides
    /// preference
    pub pools: Vec<Pool>,

    /// CPU and GPU hardware configuration
    #[serde(default, rename = "hardwareConfiguration")]
    pub hardware_configuration: HardwareConfig,
}

impl MinerConfig {
    /// Loads and validates a configuration file
    ///
    /// # Errors
    /// Returns `MinerError::ConfigError` with a guided message if the file
    /// cannot be read, is not valid JSON, or references an unknown algorithm.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MinerError> {
        let path = path.as_ref();

        let contents = std::fs::read_to_string(path).map_err(|e| {
            MinerError::ConfigError(format!(
                "Failed to read config at {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: MinerConfig = serde_json::from_str(&contents).map_err(|e| {
            MinerError::ConfigError(format!(
                "Failed to parse {}: {}. Check the file is valid JSON, or \
                 delete it and let the miner regenerate it.",
                path.display(),
                e
            ))
        })?;

        config.validate()?;

        Ok(config)
    }

    /// Writes the configuration back out, normalising the layout.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), MinerError> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), contents + "\n")?;
        Ok(())
    }

    /// Checks every pool for validity.
    pub fn validate(&self) -> Result<(), MinerError> {
        if self.pools.is_empty() {
            return Err(MinerError::ConfigError(
                "No pools configured. Add at least one pool to mine to.".to_string(),
            ));
        }

        for pool in &self.pools {
            pool.validate()?;
        }

        Ok(())
    }

    /// Builds a configuration from command-line arguments.
    fn from_options(options: &Options) -> Result<Self, MinerError> {
        let address = options.pool.as_deref().ok_or_else(|| {
            MinerError::ConfigError("No pool given. Pass --pool <host:port>.".to_string())
        })?;

        let (host, port) = parse_pool_address(address)?;

        let username = options.username.clone().ok_or_else(|| {
            MinerError::ConfigError(
                "No username given. Pass --username <wallet address>.".to_string(),
            )
        })?;

        let pool = Pool {
            host,
            port,
            username,
            password: options.password.clone().unwrap_or_default(),
            rig_id: options.rigid.clone().unwrap_or_default(),
            algorithm: options
                .algorithm
                .map(|a| a.canonical_name().to_string())
                .unwrap_or_else(|| AlgorithmType::ChukwaV2.canonical_name().to_string()),
            agent: String::new(),
            login_id: String::new(),
            nice_hash: false,
            priority: 0,
            ssl: options.ssl,
            disable_auto_algo_select: false,
        };

        let config = MinerConfig {
            pools: vec![pool],
            hardware_configuration: HardwareConfig::default(),
        };

        config.validate()?;

        Ok(config)
    }

    /// Applies command-line overrides on top of a loaded configuration.
    fn apply_overrides(&mut self, options: &Options) {
        let hardware = &mut self.hardware_configuration;

        if let Some(threads) = options.threads {
            hardware.cpu.thread_count = threads;
        }

        if options.disable_cpu {
            hardware.cpu.enabled = false;
        }

        if options.disable_nvidia {
            for gpu in &mut hardware.nvidia.devices {
                gpu.enabled = false;
            }
        }

        if options.disable_amd {
            for gpu in &mut hardware.amd.devices {
                gpu.enabled = false;
            }
        }
    }

    /// Resolves the effective configuration per the CLI contract
    ///
    /// Pool arguments take precedence; otherwise an existing config file is
    /// used; otherwise the user is prompted and the answers are written out.
    /// A successfully loaded file is rewritten to normalise its layout.
    pub fn resolve(options: &Options) -> Result<Self, MinerError> {
        let path: &PathBuf = &options.config;

        let mut config = if options.pool.is_some() || options.username.is_some() {
            Self::from_options(options)?
        } else if path.exists() {
            let config = Self::load(path)?;
            // Rewrite to normalise the layout
            config.save(path)?;
            config
        } else {
            let config = Self::from_prompts()?;
            config.save(path)?;
            log::info!("Wrote configuration to {}", path.display());
            config
        };

        config.apply_overrides(options);

        Ok(config)
    }

    /// Interactively builds a configuration from stdin prompts.
    fn from_prompts() -> Result<Self, MinerError> {
        let stdin = io::stdin();
        let mut lines = stdin.lock().lines();

        let (host, port) = loop {
            match parse_pool_address(&prompt(&mut lines, "Pool address (host:port)")?) {
                Ok(parsed) => break parsed,
                Err(e) => println!("{}", e),
            }
        };

        let username = prompt(&mut lines, "Username (normally your wallet address)")?;
        let password = prompt(&mut lines, "Password (leave blank for none)")?;

        let algorithm = loop {
            let answer = prompt(&mut lines, "Mining algorithm (e.g. turtlecoin, chukwa)")?;

            match answer.parse::<AlgorithmType>() {
                Ok(algorithm) => break algorithm,
                Err(e) => println!("{}", e),
            }
        };

        Ok(MinerConfig {
            pools: vec![Pool {
                host,
                port,
                username,
                password,
                rig_id: String::new(),
                algorithm: algorithm.canonical_name().to_string(),
                agent: String::new(),
                login_id: String::new(),
                nice_hash: false,
                priority: 0,
                ssl: false,
                disable_auto_algo_select: false,
            }],
            hardware_configuration: HardwareConfig::default(),
        })
    }
}

/// Splits a `host:port` pool address.
fn parse_pool_address(address: &str) -> Result<(String, u16), MinerError> {
    let (host, port) = address.rsplit_once(':').ok_or_else(|| {
        MinerError::ConfigError(format!(
            "Pool address \"{}\" is not of the form host:port",
            address
        ))
    })?;

    if host.is_empty() {
        return Err(MinerError::ConfigError(format!(
            "Pool address \"{}\" has an empty host",
            address
        )));
    }

    let port = port.parse::<u16>().map_err(|_| {
        MinerError::ConfigError(format!("\"{}\" is not a valid port number", port))
    })?;

    Ok((host.to_string(), port))
}

fn prompt(
    lines: &mut impl Iterator<Item = io::Result<String>>,
    question: &str,
) -> Result<String, MinerError> {
    print!("{}: ", question);
    io::stdout().flush()?;

    match lines.next() {
        Some(line) => Ok(line?.trim().to_string()),
        None => Err(MinerError::InputError("Standard input closed".to_string())),
    }
}
