//! Runtime configuration for gpu-reserve.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! Command-line flags override whatever the file sets.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::gpu::device::{from_gib, DeviceSelection};
use crate::gpu::stub::StubDeviceSpec;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "gpu-reserve",
    version,
    about = "Pick, restrict and wait for GPUs before starting an ML workload"
)]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "gpu-reserve.json")]
    pub config: PathBuf,

    /// Device backend (overrides the config file).
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List physical devices and their free memory.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Report the visible device with the most free memory.
    Select,

    /// Restrict the workload to the given devices (-1 = all).
    Restrict {
        #[arg(allow_negative_numbers = true)]
        devices: Vec<i64>,
    },

    /// Block until the given devices (-1 = all) have enough free memory.
    Await {
        #[arg(allow_negative_numbers = true)]
        devices: Vec<i64>,

        #[command(flatten)]
        wait: WaitArgs,
    },

    /// Select the freeest device, wait for memory on it, restrict to it,
    /// then optionally run a command with the restricted environment.
    Auto {
        #[command(flatten)]
        wait: WaitArgs,

        /// Command to run once the device is reserved.
        #[arg(last = true)]
        command: Vec<String>,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct WaitArgs {
    /// Required free memory in GiB.
    #[arg(long)]
    pub min_gib: Option<f64>,

    /// Seconds between free-memory checks.
    #[arg(long)]
    pub interval: Option<u64>,
}

/// Where device information comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// NVIDIA driver via NVML.
    Nvml,
    /// In-memory devices from `stub_devices`.
    Stub,
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device backend.
    pub backend: Backend,

    /// Devices to restrict to / wait for when none are given on the command line.
    pub devices: DeviceSelection,

    /// Free memory required before starting, in bytes.
    pub min_free_bytes: u64,

    /// Seconds between free-memory checks.
    pub poll_interval_secs: u64,

    /// Devices for the stub backend. Empty means the built-in dev profile.
    pub stub_devices: Vec<StubDeviceSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::Nvml,
            devices: DeviceSelection::all(),
            min_free_bytes: 0,
            poll_interval_secs: 60,
            stub_devices: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Apply command-line overrides.
    pub fn with_cli(mut self, cli: &Cli) -> Self {
        if let Some(backend) = cli.backend {
            self.backend = backend;
        }
        self
    }

    /// Apply wait overrides from a subcommand.
    pub fn with_wait_args(mut self, wait: &WaitArgs) -> Self {
        if let Some(gib) = wait.min_gib {
            self.min_free_bytes = from_gib(gib);
        }
        if let Some(secs) = wait.interval {
            self.poll_interval_secs = secs;
        }
        self
    }

    /// Command-line devices if any were given, otherwise the configured ones.
    pub fn devices_or(&self, devices: &[i64]) -> DeviceSelection {
        if devices.is_empty() {
            self.devices.clone()
        } else {
            DeviceSelection::from(devices)
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
