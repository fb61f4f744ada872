//! Error types for flightlink.
//!
//! Framing problems on the serial link never show up here: the transport
//! drops malformed frames silently and resynchronizes. What remains are
//! configuration, storage and link-level failures, plus the client-side
//! errors a companion tool sees when the device answers unexpectedly.

use std::path::PathBuf;
use thiserror::Error;

use crate::protocol::RequestId;

/// Errors raised while opening a flight log file.
#[derive(Error, Debug)]
pub enum FlightFileError {
    /// The file could not be opened or its header could not be read.
    #[error("failed to open flight log {path}: {source}")]
    Open {
        /// Path of the flight log.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The leading magic number does not identify a flight log.
    #[error("{path} is not a flight log (magic 0x{found:08X})")]
    BadMagic {
        /// Path of the flight log.
        path: PathBuf,
        /// The magic number actually found.
        found: u32,
    },

    /// The file ends before the fixed header is complete.
    #[error("flight log {path} has a truncated header")]
    TruncatedHeader {
        /// Path of the flight log.
        path: PathBuf,
    },
}

/// The main error type for flightlink operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Link Errors ===
    /// The peer went away (end of stream, reset or broken pipe).
    #[error("maintenance link closed")]
    LinkClosed,

    /// A response payload exceeded the frame payload limit.
    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge {
        /// Size of the rejected payload.
        size: usize,
        /// The payload limit.
        max: usize,
    },

    /// Failed to bind or accept on the server socket.
    #[error("failed to listen on {addr}: {source}")]
    Listen {
        /// The listen address.
        addr: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to connect to a device.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// The device address.
        addr: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Client Errors ===
    /// The device did not answer in time.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
    },

    /// The device refused to list its flights.
    #[error("device could not list its flights")]
    ListingUnavailable,

    /// The device refused to open the requested flight.
    #[error("device rejected flight '{name}'")]
    FlightRejected {
        /// Name of the requested flight.
        name: String,
    },

    /// A response payload could not be decoded.
    #[error("malformed {id} payload: {reason}")]
    MalformedPayload {
        /// Identifier of the response.
        id: RequestId,
        /// What was wrong with it.
        reason: String,
    },

    /// A flight name cannot be encoded into a request.
    #[error("invalid flight name '{0}'")]
    InvalidFlightName(String),

    // === Storage Errors ===
    /// A flight log could not be opened.
    #[error(transparent)]
    FlightFile(#[from] FlightFileError),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === I/O Errors ===
    /// File system or socket operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Serialization Errors ===
    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for flightlink operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a timeout error for the named operation.
    #[must_use]
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create a malformed payload error.
    #[must_use]
    pub fn malformed(id: RequestId, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            id,
            reason: reason.into(),
        }
    }

    /// Check if this error means the peer disconnected.
    #[must_use]
    pub fn is_link_closed(&self) -> bool {
        matches!(self, Self::LinkClosed)
    }
}
