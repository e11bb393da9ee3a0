//! TOML configuration for linkstress.
//!
//! A layered model with sensible defaults: an explicit path, then the
//! `LINKSTRESS_CONFIG` environment variable, then the standard system
//! location, then compiled-in defaults. Command-line flags are applied on top
//! by the binary.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Environment variable naming an alternative config file.
pub const CONFIG_ENV: &str = "LINKSTRESS_CONFIG";

/// Standard system location of the config file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/linkstress/linkstress.toml";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid baud rate {0}; valid baud rates are: {list}", list = BaudRate::valid_list())]
    InvalidBaudRate(u32),

    #[error("port lists differ in length: {dut} DUT port(s) but {aux} AUX port(s)")]
    MismatchedPorts { dut: usize, aux: usize },

    #[error("no port pairs configured")]
    NoPorts,

    #[error("duration must be a positive number of seconds")]
    ZeroDuration,

    #[error("iteration count must be at least 1")]
    ZeroIterations,

    #[error("traffic chunk length must be at least 1")]
    ZeroChunkLen,
}

// ---------------------------------------------------------------------------
// Baud rate
// ---------------------------------------------------------------------------

/// A baud rate from the supported set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(into = "u32")]
pub struct BaudRate(u32);

impl BaudRate {
    pub const VALID: [u32; 13] = [
        50, 75, 110, 300, 600, 1200, 9600, 14400, 19200, 28800, 57600, 115200, 230400,
    ];

    pub fn value(self) -> u32 {
        self.0
    }

    fn valid_list() -> String {
        Self::VALID
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = ConfigError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if Self::VALID.contains(&value) {
            Ok(BaudRate(value))
        } else {
            Err(ConfigError::InvalidBaudRate(value))
        }
    }
}

impl From<BaudRate> for u32 {
    fn from(baud: BaudRate) -> u32 {
        baud.0
    }
}

impl std::str::FromStr for BaudRate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u32 = s
            .trim()
            .parse()
            .map_err(|_| format!("'{}' is not a number", s))?;
        BaudRate::try_from(value).map_err(|e| e.to_string())
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for a stress campaign.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub ports: PortsConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub traffic: TrafficConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub check: CheckConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl HarnessConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded linkstress configuration");
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path named by `LINKSTRESS_CONFIG`.
    /// 2. `/etc/linkstress/linkstress.toml`.
    /// 3. Compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "LINKSTRESS_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Check everything that can be checked before a port is opened.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ports.validate()?;
        if self.traffic.chunk_len == 0 {
            return Err(ConfigError::ZeroChunkLen);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// Which [`crate::link::PortOpener`] a campaign uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Physical serial devices.
    #[default]
    Serial,
    /// In-memory null-modem wires between each DUT and its AUX port.
    Loopback,
}

/// Port topology. `dut[i]` transmits to `aux[i]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsConfig {
    pub dut: Vec<String>,
    pub aux: Vec<String>,
    pub backend: Backend,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            dut: (0..4).map(|i| format!("/dev/ttye80{}", i)).collect(),
            aux: (0..4).map(|i| format!("/dev/ttyTS0{}", i)).collect(),
            backend: Backend::Serial,
        }
    }
}

impl PortsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dut.len() != self.aux.len() {
            return Err(ConfigError::MismatchedPorts {
                dut: self.dut.len(),
                aux: self.aux.len(),
            });
        }
        if self.dut.is_empty() {
            return Err(ConfigError::NoPorts);
        }
        Ok(())
    }

    /// DUT/AUX pairs in configuration order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.dut
            .iter()
            .map(String::as_str)
            .zip(self.aux.iter().map(String::as_str))
    }
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// Device settings applied when a port is opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    /// Software (XON/XOFF) flow control.
    pub xonxoff: bool,
    /// Upper bound on a single receiver read.
    pub max_read_bytes: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 2000,
            write_timeout_ms: 2000,
            xonxoff: false,
            max_read_bytes: 256,
        }
    }
}

// ---------------------------------------------------------------------------
// Traffic
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficConfig {
    /// Symbols per payload chunk.
    pub chunk_len: usize,
    /// Fixed RNG seed for reproducible payloads. Each DUT port derives its
    /// own stream from it.
    pub seed: Option<u64>,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            chunk_len: 1,
            seed: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Grace periods around each session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Delay before a task starts its loop.
    pub start_delay_ms: u64,
    /// Delay before a task closes its port, letting in-flight bytes land.
    pub drain_delay_ms: u64,
    /// How much longer than the sender a receiver keeps listening.
    pub receiver_grace_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            start_delay_ms: 1000,
            drain_delay_ms: 2000,
            receiver_grace_ms: 5000,
        }
    }
}

impl TimingConfig {
    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }

    pub fn drain_delay(&self) -> Duration {
        Duration::from_millis(self.drain_delay_ms)
    }

    pub fn receiver_grace(&self) -> Duration {
        Duration::from_millis(self.receiver_grace_ms)
    }
}

// ---------------------------------------------------------------------------
// Check
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    /// With detailed logging on, fail the session when the received content
    /// differs from what was sent, not only when bytes are missing.
    pub strict_content: bool,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
    /// Append log records to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
