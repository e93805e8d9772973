//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - ping: check the daemon is alive
//! - list / info: show torrents
//! - start / stop / remove / add: change torrents
//! - session: read or change daemon preferences

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use clutch::domain::{EncryptionMode, SessionSettings};

use super::view::{Filter, SortKey, ViewContext};

/// Clutch - command-line client for the Transmission daemon
#[derive(Parser, Debug)]
#[command(name = "clutch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Daemon socket path or host:port, overrides the config file
    #[arg(short, long, global = true)]
    pub address: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Per-request timeout in milliseconds
    #[arg(short, long = "timeout-ms", global = true)]
    pub timeout_ms: Option<u64>,

    /// Subcommand to execute (defaults to `list`)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check that the daemon answers
    Ping,

    /// List torrents
    List {
        /// Only show torrents in this state
        #[arg(short, long, value_enum, default_value_t = Filter::All)]
        filter: Filter,

        /// Sort column
        #[arg(short, long, value_enum, default_value_t = SortKey::Id)]
        sort: SortKey,

        /// Reverse the sort order
        #[arg(short, long)]
        reverse: bool,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show everything known about specific torrents
    Info {
        /// Torrent ids
        #[arg(required = true, value_parser = clap::value_parser!(i64).range(1..))]
        ids: Vec<i64>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Start torrents (all when no ids are given)
    Start {
        /// Torrent ids
        #[arg(value_parser = clap::value_parser!(i64).range(1..))]
        ids: Vec<i64>,
    },

    /// Stop torrents (all when no ids are given)
    Stop {
        /// Torrent ids
        #[arg(value_parser = clap::value_parser!(i64).range(1..))]
        ids: Vec<i64>,
    },

    /// Remove torrents
    Remove {
        /// Torrent ids
        #[arg(required_unless_present = "all", conflicts_with = "all", value_parser = clap::value_parser!(i64).range(1..))]
        ids: Vec<i64>,

        /// Remove every torrent
        #[arg(long)]
        all: bool,
    },

    /// Add a torrent from a .torrent file
    Add {
        /// Path to the .torrent file
        path: PathBuf,

        /// Download directory for this torrent
        #[arg(short, long)]
        dir: Option<String>,

        /// Add without starting
        #[arg(long)]
        paused: bool,

        /// Send the path instead of the file contents (daemon must be able to read it)
        #[arg(long)]
        by_path: bool,
    },

    /// Daemon-wide preferences
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
}

impl Commands {
    /// View settings for `list`; defaults for everything else.
    pub fn view(&self) -> ViewContext {
        match self {
            Commands::List {
                filter, sort, reverse, ..
            } => ViewContext {
                filter: *filter,
                sort: *sort,
                reverse: *reverse,
            },
            _ => ViewContext::default(),
        }
    }
}

/// Session subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum SessionCommands {
    /// Show current preferences
    Get {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Change preferences
    Set {
        /// Default download directory
        #[arg(long)]
        download_dir: Option<String>,

        /// Download limit in KB/s, -1 for unlimited
        #[arg(long, allow_negative_numbers = true)]
        download_limit: Option<i64>,

        /// Upload limit in KB/s, -1 for unlimited
        #[arg(long, allow_negative_numbers = true)]
        upload_limit: Option<i64>,

        /// Peer encryption policy
        #[arg(long, value_enum)]
        encryption: Option<EncryptionArg>,

        /// Listening port
        #[arg(long)]
        port: Option<u16>,

        /// Temporary speed limit override
        #[arg(long, value_enum)]
        speed_limit_override: Option<Toggle>,
    },
}

impl SessionCommands {
    /// Settings to send for `session set`.
    pub fn settings(&self) -> Option<SessionSettings> {
        match self {
            SessionCommands::Get { .. } => None,
            SessionCommands::Set {
                download_dir,
                download_limit,
                upload_limit,
                encryption,
                port,
                speed_limit_override,
            } => Some(SessionSettings {
                download_dir: download_dir.clone(),
                download_limit: *download_limit,
                upload_limit: *upload_limit,
                encryption: encryption.map(EncryptionMode::from),
                port: port.map(i64::from),
                speed_limit_override: speed_limit_override.map(|t| t == Toggle::On),
                ..Default::default()
            }),
        }
    }
}

/// Encryption policy as accepted on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionArg {
    Required,
    Preferred,
    Tolerated,
}

impl From<EncryptionArg> for EncryptionMode {
    fn from(arg: EncryptionArg) -> Self {
        match arg {
            EncryptionArg::Required => EncryptionMode::Required,
            EncryptionArg::Preferred => EncryptionMode::Preferred,
            EncryptionArg::Tolerated => EncryptionMode::Tolerated,
        }
    }
}

/// on/off switch
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    On,
    Off,
}
