//! Client configuration.
//!
//! Loaded from ./clutch.yml or ~/.config/clutch/clutch.yml

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::daemon::{DaemonAddress, RetryPolicy};
use crate::ipc::ControllerOptions;

/// Project-local config file name.
pub const PROJECT_CONFIG: &str = "clutch.yml";

/// Configuration for Clutch.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Log level when RUST_LOG is unset.
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Where and how to reach the daemon.
    pub daemon: DaemonConfig,

    /// Connection retry policy.
    pub retry: RetryConfig,

    /// Message controller limits.
    pub ipc: IpcConfig,
}

impl Config {
    /// Load configuration with fallback chain.
    ///
    /// Search order:
    /// 1. Explicit path if provided
    /// 2. clutch.yml in current directory
    /// 3. ~/.config/clutch/clutch.yml
    /// 4. Defaults
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // Explicit path takes precedence
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project config
        let project_config = PathBuf::from(PROJECT_CONFIG);
        if project_config.exists() {
            match Self::load_from_file(&project_config) {
                Ok(config) => {
                    log::info!("Loaded config from {}", PROJECT_CONFIG);
                    return Ok(config);
                }
                Err(e) => {
                    log::warn!("Failed to load {}: {}", PROJECT_CONFIG, e);
                }
            }
        }

        // Try user config
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("clutch").join(PROJECT_CONFIG);
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", user_config.display());
                        return Ok(config);
                    }
                    Err(e) => {
                        log::warn!("Failed to load {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // Use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.retry.attempts == 0 {
            eyre::bail!("retry.attempts must be > 0");
        }
        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            eyre::bail!("retry.max-backoff-ms must be >= retry.initial-backoff-ms");
        }
        if self.ipc.request_timeout_ms == 0 {
            eyre::bail!("ipc.request-timeout-ms must be > 0");
        }
        if self.ipc.max_frame_length == 0 {
            eyre::bail!("ipc.max-frame-length must be > 0");
        }
        if self.ipc.max_depth == 0 {
            eyre::bail!("ipc.max-depth must be > 0");
        }
        Ok(())
    }

    /// Replace the daemon address, e.g. from a command-line flag.
    pub fn with_address(mut self, address: DaemonAddress) -> Self {
        self.daemon.address = address;
        self
    }

    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            request_timeout: Duration::from_millis(self.ipc.request_timeout_ms),
            max_frame_length: self.ipc.max_frame_length,
            max_depth: self.ipc.max_depth,
            notification_capacity: self.ipc.notification_capacity,
            handshake: self.daemon.handshake,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry.attempts,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.daemon.connect_timeout_ms)
    }
}

/// Daemon endpoint settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Socket path or host:port.
    pub address: DaemonAddress,

    /// Per-attempt connect timeout.
    #[serde(rename = "connect-timeout-ms")]
    pub connect_timeout_ms: u64,

    /// Exchange version messages on connect.
    pub handshake: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            address: DaemonAddress::default(),
            connect_timeout_ms: 5000,
            handshake: true,
        }
    }
}

/// Connection retry settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total connection attempts.
    pub attempts: u32,

    /// Delay after the first failure.
    #[serde(rename = "initial-backoff-ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound on the doubling delay.
    #[serde(rename = "max-backoff-ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 2000,
        }
    }
}

/// Message controller limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Default per-call timeout.
    #[serde(rename = "request-timeout-ms")]
    pub request_timeout_ms: u64,

    /// Largest frame accepted or sent.
    #[serde(rename = "max-frame-length")]
    pub max_frame_length: usize,

    /// Nesting bound for decoded values.
    #[serde(rename = "max-depth")]
    pub max_depth: usize,

    /// Notifications buffered before new ones are dropped.
    #[serde(rename = "notification-capacity")]
    pub notification_capacity: usize,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            max_frame_length: crate::ipc::DEFAULT_MAX_FRAME_LENGTH,
            max_depth: crate::bencode::DEFAULT_MAX_DEPTH,
            notification_capacity: 64,
        }
    }
}
