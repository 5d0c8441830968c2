// src/types.rs
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported proof-of-work algorithms
///
/// All three are Argon2id parameter sets; they differ only in memory and
/// iteration count. Pools advertise them under a variety of names, all of
/// which [`AlgorithmType::from_str`] accepts.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum AlgorithmType {
    /// Chukwa v1 (512 KiB, 3 iterations)
    #[clap(name = "chukwa")]
    Chukwa,

    /// Chukwa v2 (1024 KiB, 4 iterations), used by TurtleCoin
    #[clap(name = "turtlecoin")]
    ChukwaV2,

    /// Chukwa as deployed by WrkzCoin (256 KiB, 4 iterations)
    #[clap(name = "wrkzcoin")]
    ChukwaWrkz,
}

impl AlgorithmType {
    /// Argon2 memory cost in KiB.
    pub fn memory_kb(&self) -> u32 {
        match self {
            AlgorithmType::Chukwa => 512,
            AlgorithmType::ChukwaV2 => 1024,
            AlgorithmType::ChukwaWrkz => 256,
        }
    }

    /// Argon2 iteration count.
    pub fn iterations(&self) -> u32 {
        match self {
            AlgorithmType::Chukwa => 3,
            AlgorithmType::ChukwaV2 => 4,
            AlgorithmType::ChukwaWrkz => 4,
        }
    }

    /// Argon2 lane count. Every variant is single-lane.
    pub fn lanes(&self) -> u32 {
        1
    }

    /// The canonical pool-facing name.
    pub fn canonical_name(&self) -> &'static str {
        match self {
            AlgorithmType::Chukwa => "chukwa",
            AlgorithmType::ChukwaV2 => "turtlecoin",
            AlgorithmType::ChukwaWrkz => "wrkzcoin",
        }
    }

    /// Whether `name` maps to a known algorithm.
    pub fn is_supported(name: &str) -> bool {
        name.parse::<AlgorithmType>().is_ok()
    }
}

impl fmt::Display for AlgorithmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_name())
    }
}

impl FromStr for AlgorithmType {
    type Err = String;

    /// Maps all the names pools use for these algorithms onto the internal
    /// enum. Matching is case-insensitive and ignores surrounding whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "chukwa" | "argon2" | "argon2/chukwa" => Ok(AlgorithmType::Chukwa),

            "chukwav2" | "chukwa_v2" | "chukwa-v2" | "turtlecoin" | "trtl"
            | "argon2/chukwav2" | "argon2/chukwa-v2" => Ok(AlgorithmType::ChukwaV2),

            "chukwa_wrkz" | "wrkzcoin" | "wrkz" | "argon2/wrkz" | "chukwa/wrkz" => {
                Ok(AlgorithmType::ChukwaWrkz)
            }

            _ => Err(format!("Unknown algorithm: {}", s)),
        }
    }
}

/// CPU optimisation hint for the Argon2 implementation
///
/// Injected into the algorithm constructor rather than read from any global
/// state. `Auto` lets the implementation pick the best available path.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptimizationMethod {
    /// Pick the best supported instruction set at runtime
    Auto,
    /// AVX-512F
    Avx512,
    /// AVX2
    Avx2,
    /// SSE4.1
    Sse41,
    /// SSSE3
    Ssse3,
    /// SSE2
    Sse2,
    /// ARMv8 NEON
    Neon,
    /// Portable scalar code only
    None,
}

impl Default for OptimizationMethod {
    fn default() -> Self {
        OptimizationMethod::Auto
    }
}

impl fmt::Display for OptimizationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OptimizationMethod::Auto => "AUTO",
            OptimizationMethod::Avx512 => "AVX512",
            OptimizationMethod::Avx2 => "AVX2",
            OptimizationMethod::Sse41 => "SSE41",
            OptimizationMethod::Ssse3 => "SSSE3",
            OptimizationMethod::Sse2 => "SSE2",
            OptimizationMethod::Neon => "NEON",
            OptimizationMethod::None => "NONE",
        };
        write!(f, "{}", name)
    }
}
