//! Daemon-wide preferences exchanged by `session-get` / `session-set`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::record::RecordReader;
use crate::bencode::{DictBuilder, Value};
use crate::error::{ClutchError, Result};

/// Rate limit value meaning "no limit".
pub const UNLIMITED: i64 = -1;

/// Peer connection encryption policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionMode {
    Required,
    Preferred,
    Tolerated,
}

impl EncryptionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            EncryptionMode::Required => "required",
            EncryptionMode::Preferred => "preferred",
            EncryptionMode::Tolerated => "tolerated",
        }
    }
}

impl fmt::Display for EncryptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncryptionMode {
    type Err = ClutchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "required" => Ok(EncryptionMode::Required),
            "preferred" => Ok(EncryptionMode::Preferred),
            "tolerated" => Ok(EncryptionMode::Tolerated),
            other => Err(ClutchError::InvalidArgument(format!("unknown encryption mode '{}'", other))),
        }
    }
}

/// Session preferences. Every field is optional: on `session-set` only the
/// populated ones are sent, on `session-get` only what the daemon reported
/// is filled in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SessionSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<String>,
    /// KiB/s, `UNLIMITED` for none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_limit: Option<i64>,
    /// KiB/s, `UNLIMITED` for none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_limit_override: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption: Option<EncryptionMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_forwarding: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pex: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autostart: Option<bool>,
}

impl SessionSettings {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Check values before they go on the wire.
    pub fn validate(&self) -> Result<()> {
        for (name, limit) in [("download-limit", self.download_limit), ("upload-limit", self.upload_limit)] {
            if let Some(n) = limit.filter(|n| *n < UNLIMITED) {
                return Err(ClutchError::InvalidArgument(format!("{} must be >= -1, got {}", name, n)));
            }
        }
        if let Some(port) = self.port.filter(|p| !(1..=65535).contains(p)) {
            return Err(ClutchError::InvalidArgument(format!("port out of range: {}", port)));
        }
        if self.download_dir.as_deref() == Some("") {
            return Err(ClutchError::InvalidArgument("empty download directory".into()));
        }
        Ok(())
    }

    pub fn to_value(&self) -> Value {
        DictBuilder::new()
            .insert_opt("download-dir", self.download_dir.clone())
            .insert_opt("download-limit", self.download_limit)
            .insert_opt("upload-limit", self.upload_limit)
            .insert_opt("speed-limit-override", self.speed_limit_override)
            .insert_opt("encryption", self.encryption.map(EncryptionMode::as_str))
            .insert_opt("port", self.port)
            .insert_opt("port-forwarding", self.port_forwarding)
            .insert_opt("pex", self.pex)
            .insert_opt("autostart", self.autostart)
            .build()
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let dict = value.as_dict().ok_or_else(|| {
            ClutchError::Protocol(format!("session settings must be a dictionary, got {}", value.type_name()))
        })?;
        let r = RecordReader::new(dict);

        let encryption = match r.string("encryption")? {
            Some(mode) => Some(
                mode.parse::<EncryptionMode>()
                    .map_err(|_| ClutchError::Protocol(format!("field encryption: unknown mode '{}'", mode)))?,
            ),
            None => None,
        };

        Ok(Self {
            download_dir: r.string("download-dir")?,
            download_limit: r.int("download-limit")?,
            upload_limit: r.int("upload-limit")?,
            speed_limit_override: r.flag("speed-limit-override")?,
            encryption,
            port: r.int("port")?,
            port_forwarding: r.flag("port-forwarding")?,
            pex: r.flag("pex")?,
            autostart: r.flag("autostart")?,
        })
    }
}
