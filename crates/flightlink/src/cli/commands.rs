//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

/// Serve command arguments.
#[derive(Debug, Args)]
pub struct ServeCommand {
    /// Address to listen on (overrides `server.listen`)
    #[arg(short, long, value_name = "ADDR")]
    pub listen: Option<String>,

    /// Storage root holding the `flights` directory (overrides `storage.root`)
    #[arg(short, long, value_name = "DIR")]
    pub root: Option<PathBuf>,
}

/// Device info command arguments.
#[derive(Debug, Args)]
pub struct InfoCommand {
    /// Device address (overrides `client.connect`)
    #[arg(long, value_name = "ADDR")]
    pub connect: Option<String>,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// List command arguments.
#[derive(Debug, Args)]
pub struct ListCommand {
    /// Device address (overrides `client.connect`)
    #[arg(long, value_name = "ADDR")]
    pub connect: Option<String>,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Export format of a downloaded flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    /// Header and samples as JSON
    #[default]
    Json,
    /// Track as KML, for Google Earth
    Kml,
}

/// Download command arguments.
#[derive(Debug, Args)]
pub struct DownloadCommand {
    /// File name of the flight on the device
    pub name: String,

    /// Device address (overrides `client.connect`)
    #[arg(long, value_name = "ADDR")]
    pub connect: Option<String>,

    /// Export format
    #[arg(short, long, value_enum, default_value_t = ExportFormat::Json)]
    pub format: ExportFormat,

    /// Write the export to this file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

/// Inspect command arguments.
#[derive(Debug, Args)]
pub struct InspectCommand {
    /// Flight log file on the local disk
    pub file: PathBuf,

    /// Show at most this many entries
    #[arg(short, long, default_value = "10")]
    pub limit: usize,

    /// Output as JSON
    #[arg(short, long, conflicts_with = "kml")]
    pub json: bool,

    /// Output the whole track as KML
    #[arg(long)]
    pub kml: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
