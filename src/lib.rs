//! Clutch - a client for the Transmission daemon's local IPC protocol
//!
//! Layers, bottom-up:
//! - `bencode`: the value model and its canonical encoder / liberal decoder
//! - `ipc`: length-prefixed framing, message envelopes and the tagged
//!   request/response `MessageController`
//! - `daemon`: connecting, retrying and reconnecting to a daemon
//! - `domain`: typed torrents and session settings built from replies

pub mod bencode;
pub mod config;
pub mod daemon;
pub mod domain;
pub mod error;
pub mod ipc;

pub use error::{ClutchError, Result};
