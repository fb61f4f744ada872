//! Maintenance session manager.
//!
//! Runs the dialogue loop on the device side of the link: wait for a
//! request, answer it, and for multi-part answers hand out one part per
//! continuation request until the data runs out or the peer goes quiet.
//!
//! Every multi-part dialogue ends with exactly one terminal `[more=false]`
//! response, and every file or directory it opened is closed by then.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::flight_file::FlightFile;
use crate::protocol::{
    DeviceInfo, FlightListing, PayloadReader, PayloadWriter, Request, RequestId,
    ENTRIES_PER_BATCH, MAX_PAYLOAD_SIZE,
};
use crate::storage::{flight_path, FileSystem, FLIGHTS_DIR};
use crate::transport::{Clock, MonotonicClock, SerialPort, Transport};

/// Default time to wait for a continuation request.
pub const DEFAULT_CONTINUATION_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default time [`SessionManager::run`] waits for a request before checking
/// its stop signal.
pub const DEFAULT_IDLE_POLL: Duration = Duration::from_millis(1000);

/// Firmware version reported by `device_infos`.
pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Timing of the dialogue loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    /// How long a multi-part dialogue waits for the next continuation.
    pub continuation: Duration,
    /// How long the idle loop waits for a request between stop checks.
    pub idle_poll: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            continuation: DEFAULT_CONTINUATION_TIMEOUT,
            idle_poll: DEFAULT_IDLE_POLL,
        }
    }
}

/// A handle to stop a running session loop.
///
/// Cloneable; all clones share the same signal.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    stop_signal: Arc<AtomicBool>,
}

impl SessionHandle {
    /// Create a new handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the session loop to stop after the current dialogue.
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Check if the stop signal has been sent.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }

    /// Reset the stop signal.
    pub fn reset(&self) {
        self.stop_signal.store(false, Ordering::SeqCst);
    }
}

/// Outcome of waiting for a continuation.
enum Continuation {
    /// The expected continuation arrived.
    Next,
    /// Nothing arrived in time, or the peer moved on.
    Abandoned,
}

/// Device-side dialogue loop.
#[derive(Debug)]
pub struct SessionManager<P, F, C = MonotonicClock> {
    transport: Transport<P, C>,
    fs: F,
    device: DeviceInfo,
    timeouts: SessionTimeouts,
    /// A request that arrived while a dialogue was waiting for a
    /// continuation; served next.
    pending: Option<Request>,
}

impl<P, F, C> SessionManager<P, F, C>
where
    P: SerialPort,
    F: FileSystem,
    C: Clock,
{
    /// Create a session manager.
    #[must_use]
    pub fn new(
        transport: Transport<P, C>,
        fs: F,
        device: DeviceInfo,
        timeouts: SessionTimeouts,
    ) -> Self {
        Self {
            transport,
            fs,
            device,
            timeouts,
            pending: None,
        }
    }

    /// The transport this manager runs on.
    #[must_use]
    pub fn transport(&self) -> &Transport<P, C> {
        &self.transport
    }

    /// The transport this manager runs on, mutably.
    pub fn transport_mut(&mut self) -> &mut Transport<P, C> {
        &mut self.transport
    }

    /// Consume the manager, returning the transport.
    #[must_use]
    pub fn into_transport(self) -> Transport<P, C> {
        self.transport
    }

    /// Wait up to `timeout` for a request and run its whole dialogue.
    ///
    /// Returns the identifier of the request served, or `None` if nothing
    /// arrived in time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LinkClosed`] if the peer disconnected, or
    /// [`Error::PayloadTooLarge`] if a response could not be framed.
    pub fn serve_next(&mut self, timeout: Duration) -> Result<Option<RequestId>> {
        let request = match self.pending.take() {
            Some(request) => request,
            None => match self.transport.receive(timeout)? {
                Some(request) => request,
                None => return Ok(None),
            },
        };

        let id = request.id;
        debug!(%id, "Dialogue started");
        match id {
            RequestId::DeviceInfos => self.device_infos()?,
            RequestId::ListFlights => self.list_flights()?,
            RequestId::ReadFlight => self.read_flight(&request.payload)?,
            RequestId::ListFlightsData | RequestId::ReadFlightData => {
                debug!(%id, "Continuation outside of a dialogue");
                self.send_end(id)?;
            }
        }
        debug!(%id, "Dialogue ended");
        Ok(Some(id))
    }

    /// Serve dialogues until `handle` is stopped or the peer disconnects.
    ///
    /// # Errors
    ///
    /// Returns an error if a response could not be framed.
    pub fn run(&mut self, handle: &SessionHandle) -> Result<()> {
        while !handle.should_stop() {
            match self.serve_next(self.timeouts.idle_poll) {
                Ok(_) => {}
                Err(Error::LinkClosed) => {
                    info!("Maintenance link closed by peer");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
        debug!("Session loop stopped");
        Ok(())
    }

    fn device_infos(&mut self) -> Result<()> {
        let payload = self.device.encode();
        self.transport.send(RequestId::DeviceInfos, &payload)?;
        Ok(())
    }

    fn list_flights(&mut self) -> Result<()> {
        let mut dir = match self.fs.open_dir(Path::new(FLIGHTS_DIR)) {
            Ok(dir) => dir,
            Err(e) => {
                warn!(error = %e, "Cannot open flight directory");
                return self.send_end(RequestId::ListFlights);
            }
        };
        self.transport.send(RequestId::ListFlights, &[1])?;

        let mut listed = 0usize;
        while let Continuation::Next = self.await_continuation(RequestId::ListFlightsData)? {
            let Some(listing) = next_flight(&mut dir) else {
                break;
            };
            let mut writer = PayloadWriter::new();
            writer.put_bool(true);
            listing.write_to(&mut writer);
            self.transport
                .send(RequestId::ListFlightsData, writer.as_bytes())?;
            listed += 1;
        }
        drop(dir);

        debug!(listed, "Flight listing finished");
        self.send_end(RequestId::ListFlightsData)
    }

    fn read_flight(&mut self, payload: &[u8]) -> Result<()> {
        let name = match parse_flight_name(payload) {
            Ok(name) => name,
            Err(e) => {
                debug!(error = %e, "Rejected read_flight request");
                return self.send_end(RequestId::ReadFlight);
            }
        };

        let mut flight = match FlightFile::open(&self.fs, &flight_path(&name)) {
            Ok(flight) => flight,
            Err(e) => {
                debug!(error = %e, "Cannot open flight");
                return self.send_end(RequestId::ReadFlight);
            }
        };

        let mut writer = PayloadWriter::new();
        writer.put_bool(true).put_header(flight.header());
        self.transport
            .send(RequestId::ReadFlight, writer.as_bytes())?;

        let mut batches = 0usize;
        while let Continuation::Next = self.await_continuation(RequestId::ReadFlightData)? {
            let mut batch = PayloadWriter::new();
            batch.put_bool(true);
            let mut count = 0;
            while count < ENTRIES_PER_BATCH {
                match flight.read_entry() {
                    Ok(Some(entry)) => {
                        batch.put_sample(&entry.telemetry());
                        count += 1;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(%name, error = %e, "Failed to read flight entry");
                        break;
                    }
                }
            }
            if count == 0 {
                break;
            }
            debug_assert!(batch.len() <= MAX_PAYLOAD_SIZE);
            self.transport
                .send(RequestId::ReadFlightData, batch.as_bytes())?;
            batches += 1;
        }

        debug!(%name, batches, entries = flight.entries_read(), "Flight download finished");
        flight.close();
        self.send_end(RequestId::ReadFlightData)
    }

    /// Wait for the next continuation of the current dialogue.
    fn await_continuation(&mut self, expected: RequestId) -> Result<Continuation> {
        match self.transport.receive(self.timeouts.continuation)? {
            Some(request) if request.id == expected => Ok(Continuation::Next),
            Some(request) => {
                debug!(id = %request.id, %expected, "Dialogue interrupted by another request");
                self.pending = Some(request);
                Ok(Continuation::Abandoned)
            }
            None => {
                debug!(%expected, "Continuation timed out");
                Ok(Continuation::Abandoned)
            }
        }
    }

    /// Send the terminal `[more=false]` response.
    fn send_end(&mut self, id: RequestId) -> Result<()> {
        self.transport.send(id, &[0])?;
        Ok(())
    }
}

/// Advance `dir` to the next flight log that can be requested by name.
///
/// A directory read error ends the listing.
fn next_flight<D>(dir: &mut D) -> Option<FlightListing>
where
    D: Iterator<Item = std::io::Result<crate::storage::DirEntry>>,
{
    for entry in dir.by_ref() {
        match entry {
            Ok(entry) if entry.is_flight_log() && is_valid_flight_name(&entry.name) => {
                return Some(FlightListing {
                    name: entry.name,
                    size: entry.size,
                })
            }
            Ok(entry) if entry.is_flight_log() => {
                debug!(name = %entry.name, "Skipping flight with unusable name");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Failed to read flight directory");
                return None;
            }
        }
    }
    None
}

fn flight_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[^./\\\x00][^/\\\x00]*$").expect("Invalid flight name pattern")
    })
}

/// Check whether `name` is a plain file name a flight can be requested by.
///
/// Separators, NUL and a leading dot are refused; everything else,
/// spaces included, is a file name of the flight directory. Names longer
/// than a text field can carry are refused too.
#[must_use]
pub fn is_valid_flight_name(name: &str) -> bool {
    name.len() <= crate::protocol::payload::MAX_TEXT_LEN && flight_name_pattern().is_match(name)
}

/// Extract the flight name from a `read_flight` request payload.
///
/// # Errors
///
/// Returns an error if the name field is truncated, not UTF-8, or not a
/// plain file name.
pub fn parse_flight_name(payload: &[u8]) -> Result<String> {
    let name = PayloadReader::new(RequestId::ReadFlight, payload).text("flight name")?;
    if is_valid_flight_name(&name) {
        Ok(name)
    } else {
        Err(Error::InvalidFlightName(name))
    }
}

/// Build a `read_flight` request payload.
///
/// # Errors
///
/// Returns [`Error::InvalidFlightName`] if `name` is not a plain file name
/// or does not fit a text field.
pub fn encode_flight_name(name: &str) -> Result<Vec<u8>> {
    if !is_valid_flight_name(name) {
        return Err(Error::InvalidFlightName(name.to_string()));
    }
    let mut writer = PayloadWriter::new();
    writer.put_text(name);
    Ok(writer.into_bytes())
}
