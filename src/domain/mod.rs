//! Typed torrent and session model
//!
//! This module contains the types the wire records are projected into:
//! - InfoField / StatusField: closed field sets for `torrent-get` projections
//! - Record: the raw per-torrent dictionary, before projection
//! - TorrentInfo / TorrentStatus / Torrent: typed records, joined on id
//! - Selection / AddTorrent: what mutating calls target
//! - SessionSettings: daemon-wide preferences

pub mod fields;
pub mod record;
pub mod session;
pub mod torrent;

pub use fields::{FieldName, InfoField, StatusField, projection};
pub use record::Record;
pub use session::{EncryptionMode, SessionSettings, UNLIMITED};
pub use torrent::{
    AddTorrent, FileEntry, Selection, Torrent, TorrentId, TorrentInfo, TorrentSource, TorrentState,
    TorrentStatus, TrackerEntry, join_by_id, validate_ids,
};
