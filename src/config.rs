//! Configuration management for lc3-bus.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Command-line flags (applied by the binary)
//! 2. Environment variables (`LC3BUS_PRODUCER`, `LC3BUS_CONSUMER`, `LC3BUS_BUDGET`, `LC3BUS_WAIT`)
//! 3. Project-local config file (`./lc3-bus.toml`) or the file given with `--config`
//! 4. Built-in defaults
//!
//! # Config File Format
//!
//! ```toml
//! # lc3-bus.toml
//!
//! producer = "producer.obj"
//! consumer = "consumer.obj"
//! budget = 50000
//! wait = "spin"
//! lenient_decode = false
//! machine_init = { kind = "known", value = 0 }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ring::WaitPolicy;
use crate::sim::mem::MachineInitStrategy;
use crate::sim::SimFlags;

/// The name of the project-local config file.
pub const LOCAL_CONFIG: &str = "lc3-bus.toml";

/// Default instruction budget per VM.
pub const DEFAULT_BUDGET: u64 = 50_000;

/// lc3-bus configuration.
///
/// Every field is optional so that configs from several sources can be layered with [`Config::merge`].
/// The accessors fill in the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Program image run by the producer VM.
    pub producer: Option<PathBuf>,

    /// Program image run by the consumer VM.
    pub consumer: Option<PathBuf>,

    /// Maximum number of instructions each VM executes.
    pub budget: Option<u64>,

    /// Retry policy for `SEND` on a full ring and `RECV` on an empty ring.
    pub wait: Option<WaitPolicy>,

    /// Skip illegal opcodes and unknown traps instead of failing.
    pub lenient_decode: Option<bool>,

    /// How memory and registers are filled before the images load.
    pub machine_init: Option<MachineInitStrategy>,
}

/// An error reading an explicitly requested config file.
#[derive(Debug)]
pub enum ConfigErr {
    /// The file could not be read.
    Io(PathBuf, std::io::Error),
    /// The file is not a valid config.
    Parse(PathBuf, toml::de::Error),
}
impl std::fmt::Display for ConfigErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigErr::Io(path, e)    => write!(f, "failed to read config {}: {e}", path.display()),
            ConfigErr::Parse(path, e) => write!(f, "failed to parse config {}: {e}", path.display()),
        }
    }
}
impl std::error::Error for ConfigErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigErr::Io(_, e)    => Some(e),
            ConfigErr::Parse(_, e) => Some(e),
        }
    }
}

impl Config {
    /// Load configuration from the local config file and the environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Project-local `lc3-bus.toml`
    /// 3. Defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            config.merge(local_config);
        }

        config.apply_env_overrides();
        config
    }

    /// Load configuration from an explicit file and the environment.
    ///
    /// Unlike [`Config::load`], a missing or malformed file is an error.
    pub fn load_with_file(path: &Path) -> Result<Self, ConfigErr> {
        let mut config = Self::read_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// The producer's image path, defaulting to `producer.obj`.
    pub fn producer_path(&self) -> PathBuf {
        self.producer
            .clone()
            .unwrap_or_else(|| PathBuf::from("producer.obj"))
    }

    /// The consumer's image path, defaulting to `consumer.obj`.
    pub fn consumer_path(&self) -> PathBuf {
        self.consumer
            .clone()
            .unwrap_or_else(|| PathBuf::from("consumer.obj"))
    }

    /// The per-VM instruction budget, defaulting to [`DEFAULT_BUDGET`].
    pub fn budget(&self) -> u64 {
        self.budget.unwrap_or(DEFAULT_BUDGET)
    }

    /// The simulator flags described by this configuration.
    pub fn sim_flags(&self) -> SimFlags {
        SimFlags {
            lenient_decode: self.lenient_decode.unwrap_or(false),
            wait: self.wait.unwrap_or_default(),
            machine_init: self.machine_init.unwrap_or_default(),
        }
    }

    /// Reads and parses a config file.
    pub fn read_file(path: &Path) -> Result<Self, ConfigErr> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigErr::Io(path.to_path_buf(), e))?;
        let config = toml::from_str(&content)
            .map_err(|e| ConfigErr::Parse(path.to_path_buf(), e))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a specific file, if it exists and parses.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        Self::read_file(path)
            .map_err(|e| log::warn!("{e}"))
            .ok()
    }

    /// Merge another config into this one.
    /// Only overrides fields that are Some in the other config.
    pub fn merge(&mut self, other: Self) {
        if other.producer.is_some() {
            self.producer = other.producer;
        }
        if other.consumer.is_some() {
            self.consumer = other.consumer;
        }
        if other.budget.is_some() {
            self.budget = other.budget;
        }
        if other.wait.is_some() {
            self.wait = other.wait;
        }
        if other.lenient_decode.is_some() {
            self.lenient_decode = other.lenient_decode;
        }
        if other.machine_init.is_some() {
            self.machine_init = other.machine_init;
        }
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from a variable lookup.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(path) = var("LC3BUS_PRODUCER") {
            log::info!("Using LC3BUS_PRODUCER from environment: {}", path);
            self.producer = Some(PathBuf::from(path));
        }
        if let Some(path) = var("LC3BUS_CONSUMER") {
            log::info!("Using LC3BUS_CONSUMER from environment: {}", path);
            self.consumer = Some(PathBuf::from(path));
        }
        if let Some(budget) = var("LC3BUS_BUDGET") {
            match budget.trim().parse() {
                Ok(n) => self.budget = Some(n),
                Err(e) => log::warn!("Ignoring LC3BUS_BUDGET={budget:?}: {e}"),
            }
        }
        if let Some(wait) = var("LC3BUS_WAIT") {
            match wait.parse() {
                Ok(policy) => self.wait = Some(policy),
                Err(e) => log::warn!("Ignoring LC3BUS_WAIT: {e}"),
            }
        }
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# lc3-bus configuration
# Place this file at ./lc3-bus.toml or pass it with --config

# Program images for the two VMs
producer = "producer.obj"
consumer = "consumer.obj"

# Maximum instructions executed by each VM
budget = 50000

# How SEND/RECV retry on a full/empty ring: spin, yield, backoff, or bounded:LIMIT
wait = "spin"

# Skip illegal opcodes and unknown traps instead of stopping
# lenient_decode = true

# Initial memory/register contents: known, seeded, or unseeded
# machine_init = { kind = "seeded", seed = 1234 }
"#
        .to_string()
    }
}
