//! Where the daemon listens.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ClutchError, Result};

/// Default control socket of a per-user daemon.
pub const DEFAULT_SOCKET: &str = "~/.transmission/daemon/socket";

/// A Unix socket path or a TCP `host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonAddress {
    Unix(PathBuf),
    Tcp(String),
}

impl DaemonAddress {
    /// Strings containing `/` or starting with `~` or `.` are socket paths;
    /// anything else must be `host:port`.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ClutchError::InvalidArgument("empty daemon address".into()));
        }
        if raw.contains('/') || raw.starts_with('~') || raw.starts_with('.') {
            return Ok(DaemonAddress::Unix(expand_home(raw)));
        }

        let (host, port) = raw
            .rsplit_once(':')
            .ok_or_else(|| ClutchError::InvalidArgument(format!("address '{}' is neither a path nor host:port", raw)))?;
        if host.is_empty() {
            return Err(ClutchError::InvalidArgument(format!("address '{}' has no host", raw)));
        }
        port.parse::<u16>()
            .map_err(|_| ClutchError::InvalidArgument(format!("address '{}' has an invalid port", raw)))?;
        Ok(DaemonAddress::Tcp(raw.to_string()))
    }
}

impl Default for DaemonAddress {
    fn default() -> Self {
        DaemonAddress::Unix(expand_home(DEFAULT_SOCKET))
    }
}

fn expand_home(raw: &str) -> PathBuf {
    let rest = match raw.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => return PathBuf::from(raw),
    };
    match dirs::home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => PathBuf::from(raw),
    }
}

impl FromStr for DaemonAddress {
    type Err = ClutchError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for DaemonAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonAddress::Unix(path) => write!(f, "{}", path.display()),
            DaemonAddress::Tcp(addr) => f.write_str(addr),
        }
    }
}

impl Serialize for DaemonAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DaemonAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DaemonAddress::parse(&raw).map_err(serde::de::Error::custom)
    }
}
