//! Maintenance link protocol.
//!
//! Every message on the link, in both directions, is a [`Request`]: an
//! identifier plus an opaque payload of at most [`MAX_PAYLOAD_SIZE`] bytes.
//! On the wire it travels inside a frame:
//!
//! ```text
//! magic(4) | id(1) | length(2, LE) | payload(length) | checksum(2, LE)
//! ```
//!
//! The checksum covers every byte before it. See [`checksum`] for the
//! rolling function shared by both ends of the link.

pub mod checksum;
pub mod frame;
pub mod payload;

use std::fmt;

pub use checksum::Checksum;
pub use frame::{encode_frame, DecodeState, DropReason, FrameDecoder, Step, START_OF_FRAME};
pub use payload::{DeviceInfo, FlightListing, PayloadReader, PayloadWriter};

/// Maximum payload size of a single frame in bytes.
pub const MAX_PAYLOAD_SIZE: usize = 5000;

/// Number of flight entries packed into one `read_flight_data` response.
pub const ENTRIES_PER_BATCH: usize = 25;

/// Request identifiers, with their stable wire values.
///
/// Value 0 is reserved and never transmitted; "nothing decoded" is
/// expressed as `None` by [`crate::transport::Transport::receive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RequestId {
    /// Query device name, board and firmware version.
    DeviceInfos = 1,
    /// Start listing the recorded flights.
    ListFlights = 2,
    /// Pull the next flight of an open listing.
    ListFlightsData = 3,
    /// Open a recorded flight for download.
    ReadFlight = 4,
    /// Pull the next batch of entries of an open flight.
    ReadFlightData = 5,
}

impl RequestId {
    /// Decode a wire identifier.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::DeviceInfos),
            2 => Some(Self::ListFlights),
            3 => Some(Self::ListFlightsData),
            4 => Some(Self::ReadFlight),
            5 => Some(Self::ReadFlightData),
            _ => None,
        }
    }

    /// The wire value of this identifier.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether this identifier pulls the next part of a multi-part response.
    #[must_use]
    pub fn is_continuation(self) -> bool {
        matches!(self, Self::ListFlightsData | Self::ReadFlightData)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceInfos => write!(f, "device_infos"),
            Self::ListFlights => write!(f, "list_flights"),
            Self::ListFlightsData => write!(f, "list_flights_data"),
            Self::ReadFlight => write!(f, "read_flight"),
            Self::ReadFlightData => write!(f, "read_flight_data"),
        }
    }
}

/// A message exchanged over the maintenance link.
///
/// The same type carries requests from the companion tool and responses
/// from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Message identifier.
    pub id: RequestId,
    /// Message payload, interpreted per identifier and direction.
    pub payload: Vec<u8>,
}

impl Request {
    /// Create a message with the given payload.
    #[must_use]
    pub fn new(id: RequestId, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }

    /// Create a message without payload.
    #[must_use]
    pub fn empty(id: RequestId) -> Self {
        Self {
            id,
            payload: Vec::new(),
        }
    }
}
