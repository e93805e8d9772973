//! Field names for torrent projections.
//!
//! Info fields describe the torrent itself and rarely change; status fields
//! are live counters. `id` belongs to both sets because it is the join key.

use std::fmt;

/// Anything that names a field on the wire.
pub trait FieldName: Copy {
    fn name(self) -> &'static str;
}

/// Metadata fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfoField {
    Id,
    Hash,
    Name,
    Path,
    Saved,
    Private,
    Trackers,
    Comment,
    Creator,
    Date,
    Size,
    Files,
}

impl InfoField {
    pub const ALL: [InfoField; 12] = [
        InfoField::Id,
        InfoField::Hash,
        InfoField::Name,
        InfoField::Path,
        InfoField::Saved,
        InfoField::Private,
        InfoField::Trackers,
        InfoField::Comment,
        InfoField::Creator,
        InfoField::Date,
        InfoField::Size,
        InfoField::Files,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }
}

impl FieldName for InfoField {
    fn name(self) -> &'static str {
        match self {
            InfoField::Id => "id",
            InfoField::Hash => "hash",
            InfoField::Name => "name",
            InfoField::Path => "path",
            InfoField::Saved => "saved",
            InfoField::Private => "private",
            InfoField::Trackers => "trackers",
            InfoField::Comment => "comment",
            InfoField::Creator => "creator",
            InfoField::Date => "date",
            InfoField::Size => "size",
            InfoField::Files => "files",
        }
    }
}

/// Live status fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusField {
    Id,
    Completed,
    DownloadSpeed,
    DownloadTotal,
    Error,
    ErrorMessage,
    Eta,
    PeersDownloading,
    PeersFrom,
    PeersTotal,
    PeersUploading,
    Running,
    State,
    SwarmSpeed,
    Tracker,
    ScrapeCompleted,
    ScrapeLeechers,
    ScrapeSeeders,
    UploadSpeed,
    UploadTotal,
}

impl StatusField {
    pub const ALL: [StatusField; 20] = [
        StatusField::Id,
        StatusField::Completed,
        StatusField::DownloadSpeed,
        StatusField::DownloadTotal,
        StatusField::Error,
        StatusField::ErrorMessage,
        StatusField::Eta,
        StatusField::PeersDownloading,
        StatusField::PeersFrom,
        StatusField::PeersTotal,
        StatusField::PeersUploading,
        StatusField::Running,
        StatusField::State,
        StatusField::SwarmSpeed,
        StatusField::Tracker,
        StatusField::ScrapeCompleted,
        StatusField::ScrapeLeechers,
        StatusField::ScrapeSeeders,
        StatusField::UploadSpeed,
        StatusField::UploadTotal,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }
}

impl FieldName for StatusField {
    fn name(self) -> &'static str {
        match self {
            StatusField::Id => "id",
            StatusField::Completed => "completed",
            StatusField::DownloadSpeed => "download-speed",
            StatusField::DownloadTotal => "download-total",
            StatusField::Error => "error",
            StatusField::ErrorMessage => "error-message",
            StatusField::Eta => "eta",
            StatusField::PeersDownloading => "peers-downloading",
            StatusField::PeersFrom => "peers-from",
            StatusField::PeersTotal => "peers-total",
            StatusField::PeersUploading => "peers-uploading",
            StatusField::Running => "running",
            StatusField::State => "state",
            StatusField::SwarmSpeed => "swarm-speed",
            StatusField::Tracker => "tracker",
            StatusField::ScrapeCompleted => "scrape-completed",
            StatusField::ScrapeLeechers => "scrape-leechers",
            StatusField::ScrapeSeeders => "scrape-seeders",
            StatusField::UploadSpeed => "upload-speed",
            StatusField::UploadTotal => "upload-total",
        }
    }
}

impl fmt::Display for InfoField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for StatusField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Wire names for a projection, with `id` always present exactly once.
pub fn projection<F: FieldName>(fields: &[F]) -> Vec<&'static str> {
    let mut names = vec!["id"];
    for field in fields {
        let name = field.name();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}
