//! Configuration system for Clutch.
//!
//! A single YAML file with daemon, retry and ipc sections; every section
//! falls back to defaults. See [`Config::load`] for the search order.

pub use self::global::{Config, DaemonConfig, IpcConfig, PROJECT_CONFIG, RetryConfig};

mod global;
