//! Terminal rendering of torrents and session settings.
//!
//! The current filter and sort live in an explicit `ViewContext` built from
//! the command line; nothing in the protocol layer knows about them.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use colored::*;

use clutch::domain::{SessionSettings, Torrent, TorrentState, UNLIMITED};

/// Which torrents to show.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Filter {
    #[default]
    All,
    Downloading,
    Seeding,
    Paused,
}

/// Column to order the list by.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Id,
    Name,
    Progress,
}

/// Client-side filter and sort for a torrent listing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ViewContext {
    pub filter: Filter,
    pub sort: SortKey,
    pub reverse: bool,
}

impl ViewContext {
    pub fn matches(&self, torrent: &Torrent) -> bool {
        let state = torrent.status.state.as_ref();
        match self.filter {
            Filter::All => true,
            Filter::Downloading => state == Some(&TorrentState::Downloading),
            Filter::Seeding => state == Some(&TorrentState::Seeding),
            Filter::Paused => state == Some(&TorrentState::Paused),
        }
    }

    /// Filter, then sort. Ties fall back to id so output is stable.
    pub fn apply(&self, torrents: Vec<Torrent>) -> Vec<Torrent> {
        let mut shown: Vec<Torrent> = torrents.into_iter().filter(|t| self.matches(t)).collect();
        shown.sort_by(|a, b| {
            let primary = match self.sort {
                SortKey::Id => Ordering::Equal,
                SortKey::Name => {
                    let a = a.info.name.as_deref().unwrap_or("").to_lowercase();
                    let b = b.info.name.as_deref().unwrap_or("").to_lowercase();
                    a.cmp(&b)
                }
                SortKey::Progress => {
                    let a = a.progress().unwrap_or(0.0);
                    let b = b.progress().unwrap_or(0.0);
                    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
                }
            };
            primary.then_with(|| a.id().cmp(&b.id()))
        });
        if self.reverse {
            shown.reverse();
        }
        shown
    }
}

/// Aggregate transfer rates across a listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub download_speed: i64,
    pub upload_speed: i64,
}

pub fn totals(torrents: &[Torrent]) -> Totals {
    torrents.iter().fold(Totals::default(), |acc, t| Totals {
        download_speed: acc.download_speed.saturating_add(t.status.download_speed.unwrap_or(0)),
        upload_speed: acc.upload_speed.saturating_add(t.status.upload_speed.unwrap_or(0)),
    })
}

pub fn format_bytes(bytes: i64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

pub fn format_speed(bytes_per_sec: i64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec))
}

pub fn format_eta(seconds: Option<i64>) -> String {
    match seconds {
        Some(s) if s >= 0 => {
            let (h, m, s) = (s / 3600, (s % 3600) / 60, s % 60);
            if h > 0 {
                format!("{}h {:02}m", h, m)
            } else if m > 0 {
                format!("{}m {:02}s", m, s)
            } else {
                format!("{}s", s)
            }
        }
        _ => "-".to_string(),
    }
}

pub fn format_date(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

fn format_limit(limit: i64) -> String {
    if limit == UNLIMITED {
        "unlimited".to_string()
    } else {
        format!("{} KB/s", limit)
    }
}

fn colored_state(state: Option<&TorrentState>) -> ColoredString {
    match state {
        Some(TorrentState::Downloading) => "downloading".green(),
        Some(TorrentState::Seeding) => "seeding".cyan(),
        Some(TorrentState::Paused) => "paused".yellow(),
        Some(TorrentState::Checking) => "checking".blue(),
        Some(TorrentState::Stopping) => "stopping".yellow(),
        Some(TorrentState::Other(s)) => s.normal(),
        None => "-".dimmed(),
    }
}

fn progress_label(torrent: &Torrent) -> String {
    torrent
        .progress()
        .map(|p| format!("{:.1}%", p * 100.0))
        .unwrap_or_else(|| "-".to_string())
}

/// One line per torrent plus a totals footer.
pub fn render_table(torrents: &[Torrent]) -> String {
    let mut out = format!(
        "{:>4}  {:<12} {:>7} {:>11} {:>11} {:>8}  {}\n",
        "ID", "STATE", "DONE", "DOWN", "UP", "ETA", "NAME"
    )
    .bold()
    .to_string();

    for torrent in torrents {
        let status = &torrent.status;
        let mut line = format!(
            "{:>4}  {:<12} {:>7} {:>11} {:>11} {:>8}  {}",
            torrent.id().0,
            colored_state(status.state.as_ref()),
            progress_label(torrent),
            format_speed(status.download_speed.unwrap_or(0)),
            format_speed(status.upload_speed.unwrap_or(0)),
            format_eta(status.eta),
            torrent.info.name.as_deref().unwrap_or("?"),
        );
        if let Some(message) = status.error_message.as_deref().filter(|m| !m.is_empty()) {
            line.push_str(&format!("  {}", message.red()));
        }
        out.push_str(&line);
        out.push('\n');
    }

    let sum = totals(torrents);
    out.push_str(&format!(
        "{} torrents, total down {}, up {}",
        torrents.len(),
        format_speed(sum.download_speed).green(),
        format_speed(sum.upload_speed).cyan()
    ));
    out
}

/// Full detail view of one torrent.
pub fn render_details(torrent: &Torrent) -> String {
    let info = &torrent.info;
    let status = &torrent.status;
    let mut lines = vec![format!(
        "{} {}",
        format!("#{}", torrent.id()).bold(),
        info.name.as_deref().unwrap_or("?").bold()
    )];

    let mut field = |label: &str, value: String| lines.push(format!("  {:<14} {}", format!("{}:", label), value));
    if let Some(hash) = &info.hash {
        field("Hash", hash.clone());
    }
    field("State", colored_state(status.state.as_ref()).to_string());
    field("Progress", progress_label(torrent));
    if let Some(size) = info.size {
        field("Size", format_bytes(size));
    }
    if let Some(path) = &info.path {
        field("Path", path.clone());
    }
    field(
        "Transfer",
        format!(
            "down {} ({}), up {} ({})",
            format_speed(status.download_speed.unwrap_or(0)),
            format_bytes(status.download_total.unwrap_or(0)),
            format_speed(status.upload_speed.unwrap_or(0)),
            format_bytes(status.upload_total.unwrap_or(0)),
        ),
    );
    field("ETA", format_eta(status.eta));
    if let Some(total) = status.peers_total {
        field(
            "Peers",
            format!(
                "{} connected, {} downloading, {} uploading",
                total,
                status.peers_downloading.unwrap_or(0),
                status.peers_uploading.unwrap_or(0)
            ),
        );
    }
    if let Some(tracker) = &status.tracker {
        let port = tracker.port.map(|p| format!(":{}", p)).unwrap_or_default();
        field("Tracker", format!("{}{}", tracker.address, port));
    }
    if let Some(seeders) = status.scrape_seeders {
        field(
            "Swarm",
            format!("{} seeders, {} leechers", seeders, status.scrape_leechers.unwrap_or(0)),
        );
    }
    if let Some(date) = info.date {
        field("Created", format_date(date));
    }
    if let Some(creator) = info.creator.as_deref().filter(|c| !c.is_empty()) {
        field("Creator", creator.to_string());
    }
    if let Some(comment) = info.comment.as_deref().filter(|c| !c.is_empty()) {
        field("Comment", comment.to_string());
    }
    if info.private == Some(true) {
        field("Private", "yes".to_string());
    }
    if let Some(message) = status.error_message.as_deref().filter(|m| !m.is_empty()) {
        field("Error", message.red().to_string());
    }
    if let Some(files) = &info.files {
        field("Files", files.len().to_string());
        for file in files {
            lines.push(format!("    {} ({})", file.name, format_bytes(file.size)));
        }
    }
    lines.join("\n")
}

pub fn render_session(settings: &SessionSettings) -> String {
    let mut lines = Vec::new();
    let mut field = |label: &str, value: String| lines.push(format!("{:<22} {}", format!("{}:", label), value));
    if let Some(dir) = &settings.download_dir {
        field("Download directory", dir.clone());
    }
    if let Some(limit) = settings.download_limit {
        field("Download limit", format_limit(limit));
    }
    if let Some(limit) = settings.upload_limit {
        field("Upload limit", format_limit(limit));
    }
    if let Some(on) = settings.speed_limit_override {
        field("Speed limit override", if on { "on" } else { "off" }.to_string());
    }
    if let Some(mode) = settings.encryption {
        field("Encryption", mode.to_string());
    }
    if let Some(port) = settings.port {
        field("Port", port.to_string());
    }
    if let Some(on) = settings.port_forwarding {
        field("Port forwarding", if on { "on" } else { "off" }.to_string());
    }
    if let Some(on) = settings.pex {
        field("Peer exchange", if on { "on" } else { "off" }.to_string());
    }
    if let Some(on) = settings.autostart {
        field("Autostart", if on { "on" } else { "off" }.to_string());
    }
    lines.join("\n")
}
