//! Companion tool side of the maintenance link.
//!
//! [`MaintenanceClient`] issues the top-level requests and drives the
//! continuation requests itself, so callers see whole results: the device
//! identity, the complete flight list, or a fully downloaded flight.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::flight_file::{FlightHeader, TelemetrySample};
use crate::kml::Kml;
use crate::protocol::{DeviceInfo, FlightListing, PayloadReader, Request, RequestId};
use crate::session::encode_flight_name;
use crate::transport::{SerialPort, Transport};

/// Default time to wait for each response.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(2000);

/// A flight downloaded from the device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadedFlight {
    /// File name on the device.
    pub name: String,
    /// Flight header.
    pub header: FlightHeader,
    /// Telemetry samples in recording order.
    pub samples: Vec<TelemetrySample>,
}

impl DownloadedFlight {
    /// Recording duration covered by the samples.
    #[must_use]
    pub fn duration(&self) -> Duration {
        let samples = u64::try_from(self.samples.len()).unwrap_or(u64::MAX);
        Duration::from_millis(samples.saturating_mul(u64::from(self.header.period_ms)))
    }

    /// Serialize to pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Render the track as a KML document.
    #[must_use]
    pub fn to_kml(&self) -> String {
        Kml::new(&self.header, self.samples.iter().map(|sample| &sample.gnss)).to_string()
    }
}

/// Drives maintenance dialogues against a device.
#[derive(Debug)]
pub struct MaintenanceClient<P> {
    transport: Transport<P>,
    response_timeout: Duration,
}

impl<P: SerialPort> MaintenanceClient<P> {
    /// Create a client over `transport`.
    #[must_use]
    pub fn new(transport: Transport<P>, response_timeout: Duration) -> Self {
        Self {
            transport,
            response_timeout,
        }
    }

    /// Query the device identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the device does not answer or the answer is
    /// malformed.
    pub fn device_infos(&mut self) -> Result<DeviceInfo> {
        let response = self.exchange(Request::empty(RequestId::DeviceInfos))?;
        DeviceInfo::decode(&response.payload)
    }

    /// List the flights recorded on the device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ListingUnavailable`] if the device cannot list its
    /// flights, or an error if it stops answering.
    pub fn list_flights(&mut self) -> Result<Vec<FlightListing>> {
        let first = self.exchange(Request::empty(RequestId::ListFlights))?;
        if !PayloadReader::new(first.id, &first.payload).bool("more flag")? {
            return Err(Error::ListingUnavailable);
        }

        let mut flights = Vec::new();
        loop {
            let response = self.exchange(Request::empty(RequestId::ListFlightsData))?;
            let mut reader = PayloadReader::new(response.id, &response.payload);
            if !reader.bool("more flag")? {
                break;
            }
            flights.push(FlightListing::read_from(&mut reader)?);
        }
        debug!(count = flights.len(), "Listed flights");
        Ok(flights)
    }

    /// Download a whole flight.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FlightRejected`] if the device cannot open the
    /// flight, or an error if it stops answering or sends malformed data.
    pub fn read_flight(&mut self, name: &str) -> Result<DownloadedFlight> {
        let payload = encode_flight_name(name)?;
        let first = self.exchange(Request::new(RequestId::ReadFlight, payload))?;
        let mut reader = PayloadReader::new(first.id, &first.payload);
        if !reader.bool("more flag")? {
            return Err(Error::FlightRejected {
                name: name.to_string(),
            });
        }
        let header = reader.header()?;

        let mut samples = Vec::new();
        loop {
            let response = self.exchange(Request::empty(RequestId::ReadFlightData))?;
            let mut reader = PayloadReader::new(response.id, &response.payload);
            if !reader.bool("more flag")? {
                break;
            }
            while !reader.is_empty() {
                samples.push(reader.sample()?);
            }
        }
        debug!(%name, samples = samples.len(), "Downloaded flight");

        Ok(DownloadedFlight {
            name: name.to_string(),
            header,
            samples,
        })
    }

    /// Send `request` and wait for the response carrying the same id.
    fn exchange(&mut self, request: Request) -> Result<Request> {
        if !self.transport.send_request(&request)? {
            return Err(Error::LinkClosed);
        }

        let deadline = Instant::now() + self.response_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::timeout(format!("{} response", request.id)));
            }
            match self.transport.receive(remaining)? {
                Some(response) if response.id == request.id => return Ok(response),
                Some(response) => debug!(id = %response.id, "Skipping unexpected response"),
                None => return Err(Error::timeout(format!("{} response", request.id))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flight_file::fixtures::{flight_bytes, sample_entry, sample_header};
    use crate::session::{SessionHandle, SessionManager, SessionTimeouts, FIRMWARE_VERSION};
    use crate::storage::{LocalFileSystem, FLIGHTS_DIR};
    use crate::transport::{ChannelSerialPort, DEFAULT_INTER_BYTE_TIMEOUT};
    use std::thread::JoinHandle;
    use tempfile::TempDir;

    fn device() -> DeviceInfo {
        DeviceInfo {
            name: "open-vario".to_string(),
            board: "simulator".to_string(),
            firmware_version: FIRMWARE_VERSION.to_string(),
        }
    }

    /// Start a device on one end of a loopback link and return a client on
    /// the other.
    fn connect(
        files: &[(&str, Vec<u8>)],
    ) -> (TempDir, MaintenanceClient<ChannelSerialPort>, JoinHandle<Result<()>>) {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::new(dir.path());
        fs.ensure_layout().unwrap();
        for (name, content) in files {
            std::fs::write(dir.path().join(FLIGHTS_DIR).join(name), content).unwrap();
        }

        let (host, device_port) = ChannelSerialPort::pair();
        let server = std::thread::spawn(move || {
            let transport = Transport::new(device_port, DEFAULT_INTER_BYTE_TIMEOUT);
            let timeouts = SessionTimeouts {
                continuation: Duration::from_millis(1000),
                idle_poll: Duration::from_millis(50),
            };
            let mut manager = SessionManager::new(transport, fs, device(), timeouts);
            manager.run(&SessionHandle::new())
        });

        let client = MaintenanceClient::new(
            Transport::new(host, DEFAULT_INTER_BYTE_TIMEOUT),
            DEFAULT_RESPONSE_TIMEOUT,
        );
        (dir, client, server)
    }

    #[test]
    fn test_device_infos() {
        let (_dir, mut client, server) = connect(&[]);
        assert_eq!(client.device_infos().unwrap(), device());
        drop(client);
        server.join().unwrap().unwrap();
    }

    #[test]
    fn test_list_flights() {
        let (_dir, mut client, server) = connect(&[
            ("a.rec", flight_bytes(2)),
            ("b.rec", flight_bytes(5)),
            ("notes.txt", Vec::new()),
        ]);
        let mut flights = client.list_flights().unwrap();
        flights.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(
            flights,
            vec![
                FlightListing {
                    name: "a.rec".to_string(),
                    size: 46 + 2 * 42,
                },
                FlightListing {
                    name: "b.rec".to_string(),
                    size: 46 + 5 * 42,
                },
            ]
        );
        drop(client);
        server.join().unwrap().unwrap();
    }

    #[test]
    fn test_list_flights_empty() {
        let (_dir, mut client, server) = connect(&[]);
        assert!(client.list_flights().unwrap().is_empty());
        drop(client);
        server.join().unwrap().unwrap();
    }

    #[test]
    fn test_read_flight() {
        let (_dir, mut client, server) = connect(&[("a.rec", flight_bytes(60))]);
        let flight = client.read_flight("a.rec").unwrap();
        assert_eq!(flight.header, sample_header());
        assert_eq!(flight.samples.len(), 60);
        for (i, sample) in flight.samples.iter().enumerate() {
            assert_eq!(sample, &sample_entry(i).telemetry());
        }
        assert_eq!(flight.duration(), Duration::from_secs(60));

        // the link stays usable after a multi-part dialogue
        assert_eq!(client.device_infos().unwrap(), device());
        drop(client);
        server.join().unwrap().unwrap();
    }

    #[test]
    fn test_read_flight_rejected() {
        let (_dir, mut client, server) = connect(&[]);
        let err = client.read_flight("missing.rec").unwrap_err();
        assert!(matches!(err, Error::FlightRejected { name } if name == "missing.rec"));
        drop(client);
        server.join().unwrap().unwrap();
    }

    #[test]
    fn test_read_flight_invalid_name_not_sent() {
        let (_dir, mut client, server) = connect(&[]);
        let err = client.read_flight("../secret").unwrap_err();
        assert!(matches!(err, Error::InvalidFlightName(_)));
        drop(client);
        server.join().unwrap().unwrap();
    }

    #[test]
    fn test_timeout_without_device() {
        let (host, _device) = ChannelSerialPort::pair();
        let mut client = MaintenanceClient::new(
            Transport::new(host, DEFAULT_INTER_BYTE_TIMEOUT),
            Duration::from_millis(50),
        );
        let err = client.device_infos().unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(err.to_string().contains("device_infos"));
    }

    #[test]
    fn test_downloaded_flight_json() {
        let flight = DownloadedFlight {
            name: "a.rec".to_string(),
            header: sample_header(),
            samples: vec![sample_entry(1).telemetry()],
        };
        let json = flight.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["name"], "a.rec");
        assert_eq!(value["header"]["glider"], "Alpina");
        assert_eq!(value["samples"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_downloaded_flight_kml() {
        let (_dir, mut client, server) = connect(&[("a.rec", flight_bytes(8))]);
        let flight = client.read_flight("a.rec").unwrap();
        let kml = flight.to_kml();

        // entries 0 and 7 have no fix
        let takeoff = sample_entry(1).gnss;
        let landing = sample_entry(6).gnss;
        assert!(kml.contains(&format!(
            "<name>Takeoff</name>\n\t\t\t<Point>\n\t\t\t\t<coordinates>{:.6},{:.6},{}</coordinates>",
            takeoff.longitude,
            takeoff.latitude,
            takeoff.altitude / 10
        )));
        assert!(kml.contains(&format!(
            "<name>Landing</name>\n\t\t\t<Point>\n\t\t\t\t<coordinates>{:.6},{:.6},{}</coordinates>",
            landing.longitude,
            landing.latitude,
            landing.altitude / 10
        )));
        assert_eq!(kml.matches("\t\t\t\t\t").count(), 6);
        drop(client);
        server.join().unwrap().unwrap();
    }
}
