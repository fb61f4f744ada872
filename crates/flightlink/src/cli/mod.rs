//! Command-line interface for flightlink.
//!
//! This module provides the CLI structure for the `flightlink` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ConfigCommand, DownloadCommand, ExportFormat, InfoCommand, InspectCommand, ListCommand,
    ServeCommand,
};

/// flightlink - Maintenance link for flight recorders
///
/// Serves recorded flights over the maintenance link protocol, and talks to
/// a device to list and download them.
#[derive(Debug, Parser)]
#[command(name = "flightlink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the device side of the link, serving flights over TCP
    Serve(ServeCommand),

    /// Show the identity of a device
    Info(InfoCommand),

    /// List the flights recorded on a device
    List(ListCommand),

    /// Download a flight from a device as JSON
    Download(DownloadCommand),

    /// Decode a local flight log file
    Inspect(InspectCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        crate::logging::Verbosity::from_flags(self.verbose, self.quiet)
    }
}
