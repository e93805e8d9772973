//! Torrent records and the requests that target them.
//!
//! Ids are assigned by the daemon when a torrent is added and stay valid
//! until it is removed. Everything except `id` is optional because a
//! projection only carries the fields that were asked for.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use super::fields::{FieldName, InfoField, StatusField};
use super::record::RecordReader;
use crate::bencode::{Dict, DictBuilder, Value};
use crate::error::{ClutchError, Result};

/// Daemon-assigned torrent id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TorrentId(pub i64);

impl fmt::Display for TorrentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TorrentId {
    fn from(id: i64) -> Self {
        TorrentId(id)
    }
}

/// Reject ids the daemon can never have assigned.
pub fn validate_ids(ids: &[TorrentId]) -> Result<()> {
    match ids.iter().find(|id| id.0 < 1) {
        Some(bad) => Err(ClutchError::InvalidArgument(format!("invalid torrent id {}", bad))),
        None => Ok(()),
    }
}

pub(crate) fn ids_value(ids: &[TorrentId]) -> Value {
    Value::List(ids.iter().map(|id| Value::Integer(id.0)).collect())
}

/// Which torrents a call applies to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    All,
    Ids(Vec<TorrentId>),
}

impl Selection {
    /// An empty id list means every torrent.
    pub fn is_all(&self) -> bool {
        match self {
            Selection::All => true,
            Selection::Ids(ids) => ids.is_empty(),
        }
    }

    /// The `ids` argument, or `None` when it should be omitted.
    pub fn to_arg(&self) -> Result<Option<Value>> {
        match self {
            Selection::Ids(ids) if !ids.is_empty() => {
                validate_ids(ids)?;
                Ok(Some(ids_value(ids)))
            }
            _ => Ok(None),
        }
    }
}

impl From<Vec<TorrentId>> for Selection {
    fn from(ids: Vec<TorrentId>) -> Self {
        Selection::Ids(ids)
    }
}

/// Activity state reported by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TorrentState {
    Checking,
    Downloading,
    Seeding,
    Stopping,
    Paused,
    Other(String),
}

impl Serialize for TorrentState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl fmt::Display for TorrentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TorrentState {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "checking" => TorrentState::Checking,
            "downloading" => TorrentState::Downloading,
            "seeding" => TorrentState::Seeding,
            "stopping" => TorrentState::Stopping,
            "paused" => TorrentState::Paused,
            other => TorrentState::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TorrentState::Checking => "checking",
            TorrentState::Downloading => "downloading",
            TorrentState::Seeding => "seeding",
            TorrentState::Stopping => "stopping",
            TorrentState::Paused => "paused",
            TorrentState::Other(s) => s,
        }
    }
}

/// One file inside a torrent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub size: i64,
}

/// A tracker endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackerEntry {
    pub address: String,
    pub port: Option<i64>,
    pub announce: Option<String>,
    pub scrape: Option<String>,
}

impl TrackerEntry {
    fn from_dict(dict: &Dict) -> Result<Self> {
        let reader = RecordReader::new(dict);
        Ok(Self {
            address: reader
                .string("address")?
                .ok_or_else(|| ClutchError::Protocol("tracker missing address".into()))?,
            port: reader.int("port")?,
            announce: reader.string("announce")?,
            scrape: reader.string("scrape")?,
        })
    }

    fn from_value(value: &Value) -> Result<Self> {
        let dict = value
            .as_dict()
            .ok_or_else(|| ClutchError::Protocol(format!("tracker must be a dictionary, got {}", value.type_name())))?;
        Self::from_dict(dict)
    }
}

/// Torrent metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TorrentInfo {
    pub id: TorrentId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private: Option<bool>,
    /// Tracker tiers, highest priority first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trackers: Option<Vec<Vec<TrackerEntry>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    /// Creation time, seconds since the epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<FileEntry>>,
}

impl TorrentInfo {
    pub fn from_record(record: &Dict) -> Result<Self> {
        let r = RecordReader::new(record);
        let hash = r.bytes(InfoField::Hash.name())?.map(hex::encode);

        let trackers = match r.list(InfoField::Trackers.name())? {
            None => None,
            Some(tiers) => Some(
                tiers
                    .iter()
                    .map(|tier| match tier {
                        // flat lists are a single tier
                        Value::Dictionary(d) => Ok(vec![TrackerEntry::from_dict(d)?]),
                        Value::List(entries) => entries.iter().map(TrackerEntry::from_value).collect(),
                        other => Err(ClutchError::Protocol(format!(
                            "field trackers: unexpected {}",
                            other.type_name()
                        ))),
                    })
                    .collect::<Result<Vec<_>>>()?,
            ),
        };

        let files = match r.list(InfoField::Files.name())? {
            None => None,
            Some(entries) => Some(
                entries
                    .iter()
                    .map(|entry| {
                        let dict = entry
                            .as_dict()
                            .ok_or_else(|| ClutchError::Protocol("field files: entry is not a dictionary".into()))?;
                        let file = RecordReader::new(dict);
                        Ok(FileEntry {
                            name: file.string("name")?.unwrap_or_default(),
                            size: file.int("size")?.unwrap_or(0),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
            ),
        };

        Ok(Self {
            id: TorrentId(r.id()?),
            hash,
            name: r.string(InfoField::Name.name())?,
            path: r.string(InfoField::Path.name())?,
            saved: r.flag(InfoField::Saved.name())?,
            private: r.flag(InfoField::Private.name())?,
            trackers,
            comment: r.string(InfoField::Comment.name())?,
            creator: r.string(InfoField::Creator.name())?,
            date: r.int(InfoField::Date.name())?,
            size: r.int(InfoField::Size.name())?,
            files,
        })
    }
}

/// Live torrent status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TorrentStatus {
    pub id: TorrentId,

    //=== Progress ===
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<TorrentState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,
    /// Bytes of wanted data already verified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<i64>,
    /// Seconds remaining, negative when unknown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<i64>,

    //=== Transfer ===
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_speed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_speed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_total: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_total: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swarm_speed: Option<i64>,

    //=== Peers ===
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peers_total: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peers_downloading: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peers_uploading: Option<i64>,
    /// Peer counts keyed by discovery source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peers_from: Option<BTreeMap<String, i64>>,

    //=== Errors ===
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    //=== Tracker ===
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracker: Option<TrackerEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scrape_completed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scrape_leechers: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scrape_seeders: Option<i64>,
}

impl TorrentStatus {
    pub fn from_record(record: &Dict) -> Result<Self> {
        let r = RecordReader::new(record);

        let peers_from = match r.dict(StatusField::PeersFrom.name())? {
            None => None,
            Some(sources) => Some(
                sources
                    .iter()
                    .map(|(source, count)| {
                        let count = count.as_int().ok_or_else(|| {
                            ClutchError::Protocol("field peers-from: count is not an integer".into())
                        })?;
                        Ok((String::from_utf8_lossy(source).into_owned(), count))
                    })
                    .collect::<Result<BTreeMap<_, _>>>()?,
            ),
        };

        let tracker = match r.dict(StatusField::Tracker.name())? {
            None => None,
            Some(dict) => Some(TrackerEntry::from_dict(dict)?),
        };

        Ok(Self {
            id: TorrentId(r.id()?),
            state: r.string(StatusField::State.name())?.map(|s| TorrentState::parse(&s)),
            running: r.flag(StatusField::Running.name())?,
            completed: r.int(StatusField::Completed.name())?,
            eta: r.int(StatusField::Eta.name())?,
            download_speed: r.int(StatusField::DownloadSpeed.name())?,
            upload_speed: r.int(StatusField::UploadSpeed.name())?,
            download_total: r.int(StatusField::DownloadTotal.name())?,
            upload_total: r.int(StatusField::UploadTotal.name())?,
            swarm_speed: r.int(StatusField::SwarmSpeed.name())?,
            peers_total: r.int(StatusField::PeersTotal.name())?,
            peers_downloading: r.int(StatusField::PeersDownloading.name())?,
            peers_uploading: r.int(StatusField::PeersUploading.name())?,
            peers_from,
            error: r.string_or_int(StatusField::Error.name())?,
            error_message: r.string(StatusField::ErrorMessage.name())?,
            tracker,
            scrape_completed: r.int(StatusField::ScrapeCompleted.name())?,
            scrape_leechers: r.int(StatusField::ScrapeLeechers.name())?,
            scrape_seeders: r.int(StatusField::ScrapeSeeders.name())?,
        })
    }
}

/// A torrent's full visible record: metadata and status joined on id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Torrent {
    pub info: TorrentInfo,
    pub status: TorrentStatus,
}

// One flat object; the id comes from the info half only.
impl Serialize for Torrent {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::{Error, SerializeMap};

        let info = serde_json::to_value(&self.info).map_err(S::Error::custom)?;
        let status = serde_json::to_value(&self.status).map_err(S::Error::custom)?;
        let mut merged = serde_json::Map::new();
        for half in [info, status] {
            if let serde_json::Value::Object(fields) = half {
                for (key, value) in fields {
                    merged.entry(key).or_insert(value);
                }
            }
        }

        let mut out = serializer.serialize_map(Some(merged.len()))?;
        for (key, value) in &merged {
            out.serialize_entry(key, value)?;
        }
        out.end()
    }
}

impl Torrent {
    pub fn id(&self) -> TorrentId {
        self.info.id
    }

    /// Fraction of the torrent completed, when size and progress are known.
    pub fn progress(&self) -> Option<f64> {
        match (self.status.completed, self.info.size) {
            (Some(done), Some(size)) if size > 0 => Some(done as f64 / size as f64),
            _ => None,
        }
    }
}

/// Join info and status records on id.
///
/// Both sides must describe exactly the same set of torrents; anything else
/// means the two replies came from different daemon states.
pub fn join_by_id(infos: Vec<TorrentInfo>, statuses: Vec<TorrentStatus>) -> Result<Vec<Torrent>> {
    let mut info_by_id = BTreeMap::new();
    for info in infos {
        if let Some(dup) = info_by_id.insert(info.id, info) {
            return Err(ClutchError::Protocol(format!("duplicate id {} in info reply", dup.id)));
        }
    }
    let mut status_by_id = BTreeMap::new();
    for status in statuses {
        if let Some(dup) = status_by_id.insert(status.id, status) {
            return Err(ClutchError::Protocol(format!("duplicate id {} in status reply", dup.id)));
        }
    }

    let info_ids: BTreeSet<_> = info_by_id.keys().copied().collect();
    let status_ids: BTreeSet<_> = status_by_id.keys().copied().collect();
    if info_ids != status_ids {
        let only_info: Vec<_> = info_ids.difference(&status_ids).map(|id| id.0).collect();
        let only_status: Vec<_> = status_ids.difference(&info_ids).map(|id| id.0).collect();
        return Err(ClutchError::Protocol(format!(
            "join mismatch: ids only in info {:?}, only in status {:?}",
            only_info, only_status
        )));
    }

    Ok(info_by_id
        .into_iter()
        .zip(status_by_id)
        .map(|((_, info), (_, status))| Torrent { info, status })
        .collect())
}

/// Where a new torrent comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TorrentSource {
    /// Raw .torrent file contents.
    Metainfo(Vec<u8>),
    /// A .torrent path readable by the daemon process.
    Path(PathBuf),
}

/// Arguments for `torrent-add`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddTorrent {
    pub source: TorrentSource,
    pub download_dir: Option<String>,
    pub autostart: Option<bool>,
}

impl AddTorrent {
    pub fn metainfo(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            source: TorrentSource::Metainfo(bytes.into()),
            download_dir: None,
            autostart: None,
        }
    }

    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self {
            source: TorrentSource::Path(path.into()),
            download_dir: None,
            autostart: None,
        }
    }

    pub fn with_download_dir(mut self, dir: impl Into<String>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }

    pub fn with_autostart(mut self, autostart: bool) -> Self {
        self.autostart = Some(autostart);
        self
    }

    pub fn to_args(&self) -> Result<Value> {
        let builder = match &self.source {
            TorrentSource::Metainfo(bytes) if bytes.is_empty() => {
                return Err(ClutchError::InvalidArgument("empty torrent metainfo".into()));
            }
            TorrentSource::Path(path) if path.as_os_str().is_empty() => {
                return Err(ClutchError::InvalidArgument("empty torrent path".into()));
            }
            TorrentSource::Metainfo(bytes) => DictBuilder::new().insert("metainfo", bytes.clone()),
            TorrentSource::Path(path) => {
                DictBuilder::new().insert("filename", path.as_os_str().as_encoded_bytes().to_vec())
            }
        };
        Ok(builder
            .insert_opt("download-dir", self.download_dir.clone())
            .insert_opt("autostart", self.autostart)
            .build())
    }
}
