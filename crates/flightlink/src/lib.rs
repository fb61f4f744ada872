//! `flightlink` - Maintenance link for variometer flight recorders
//!
//! This library implements both ends of the serial maintenance link a
//! companion tool uses to identify a flight instrument and retrieve its
//! recorded flights: the checksummed framing, the device-side session loop
//! with pull-based multi-part responses, the companion-side client, and the
//! on-disk flight log format.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod flight_file;
pub mod kml;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;
pub mod transport;

pub use client::{DownloadedFlight, MaintenanceClient};
pub use config::Config;
pub use error::{Error, FlightFileError, Result};
pub use flight_file::{FlightEntry, FlightFile, FlightHeader, TelemetrySample};
pub use kml::Kml;
pub use logging::init_logging;
pub use protocol::{DeviceInfo, FlightListing, Request, RequestId};
pub use session::{SessionHandle, SessionManager};
pub use transport::Transport;
