//! CLI module for clutch - command-line interface and terminal output.

pub mod commands;
pub mod view;

pub use commands::Cli;
