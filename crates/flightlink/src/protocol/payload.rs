//! Payload encoding helpers.
//!
//! Multi-byte integers are little-endian. Text is a length byte followed by
//! that many bytes of UTF-8, without terminator.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};

use super::RequestId;
use crate::error::{Error, Result};
use crate::flight_file::{BaroData, FlightHeader, FlightTimestamp, GnssData, TelemetrySample};

/// Encoded size of one telemetry sample in a `read_flight_data` response.
pub const WIRE_SAMPLE_SIZE: usize = 38;

/// Longest text field a length byte can describe.
pub const MAX_TEXT_LEN: usize = u8::MAX as usize;

/// Builds a response or request payload.
#[derive(Debug, Default)]
pub struct PayloadWriter {
    bytes: Vec<u8>,
}

impl PayloadWriter {
    /// Create an empty payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether nothing was written yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The bytes written so far.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the writer, returning the payload.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Write a one-byte boolean.
    pub fn put_bool(&mut self, value: bool) -> &mut Self {
        self.put_u8(u8::from(value))
    }

    /// Write a byte.
    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.bytes.push(value);
        self
    }

    /// Write a little-endian `u16`.
    pub fn put_u16(&mut self, value: u16) -> &mut Self {
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, value);
        self.bytes.extend_from_slice(&buf);
        self
    }

    /// Write a little-endian `i16`.
    pub fn put_i16(&mut self, value: i16) -> &mut Self {
        let mut buf = [0u8; 2];
        LittleEndian::write_i16(&mut buf, value);
        self.bytes.extend_from_slice(&buf);
        self
    }

    /// Write a little-endian `u32`.
    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, value);
        self.bytes.extend_from_slice(&buf);
        self
    }

    /// Write a little-endian `i32`.
    pub fn put_i32(&mut self, value: i32) -> &mut Self {
        let mut buf = [0u8; 4];
        LittleEndian::write_i32(&mut buf, value);
        self.bytes.extend_from_slice(&buf);
        self
    }

    /// Write a little-endian IEEE-754 double.
    pub fn put_f64(&mut self, value: f64) -> &mut Self {
        let mut buf = [0u8; 8];
        LittleEndian::write_f64(&mut buf, value);
        self.bytes.extend_from_slice(&buf);
        self
    }

    /// Write a length-prefixed text field.
    ///
    /// Text longer than [`MAX_TEXT_LEN`] bytes is cut at the last character
    /// boundary that fits.
    pub fn put_text(&mut self, text: &str) -> &mut Self {
        let mut end = text.len().min(MAX_TEXT_LEN);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        let text = &text.as_bytes()[..end];
        self.put_u8(u8::try_from(text.len()).unwrap_or(u8::MAX));
        self.bytes.extend_from_slice(text);
        self
    }

    /// Write a flight start timestamp.
    pub fn put_timestamp(&mut self, ts: &FlightTimestamp) -> &mut Self {
        self.put_u8(ts.year)
            .put_u8(ts.month)
            .put_u8(ts.day)
            .put_u8(ts.hour)
            .put_u8(ts.minute)
            .put_u8(ts.second)
            .put_u16(ts.millis)
    }

    /// Write the header fields sent in the first `read_flight` response.
    pub fn put_header(&mut self, header: &FlightHeader) -> &mut Self {
        self.put_timestamp(&header.timestamp)
            .put_text(&header.glider)
            .put_u16(header.period_ms)
    }

    /// Write one telemetry sample.
    pub fn put_sample(&mut self, sample: &TelemetrySample) -> &mut Self {
        let gnss = &sample.gnss;
        let baro = &sample.baro;
        self.put_bool(gnss.valid)
            .put_f64(gnss.latitude)
            .put_f64(gnss.longitude)
            .put_i32(gnss.altitude)
            .put_u32(gnss.speed)
            .put_u16(gnss.track_angle)
            .put_bool(baro.valid)
            .put_u32(baro.pressure)
            .put_i32(baro.altitude)
            .put_i16(baro.temperature)
    }
}

/// Reads fields out of a received payload.
///
/// Every read fails with [`Error::MalformedPayload`] when the payload is
/// too short.
#[derive(Debug)]
pub struct PayloadReader<'a> {
    id: RequestId,
    data: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    /// Read the payload of a message with the given identifier.
    #[must_use]
    pub fn new(id: RequestId, data: &'a [u8]) -> Self {
        Self { id, data }
    }

    /// Bytes left to read.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len()
    }

    /// Whether every byte has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn read<T>(
        &mut self,
        what: &str,
        read: impl FnOnce(&mut &'a [u8]) -> std::io::Result<T>,
    ) -> Result<T> {
        read(&mut self.data).map_err(|_| Error::malformed(self.id, format!("truncated {what}")))
    }

    /// Read a one-byte boolean.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is exhausted.
    pub fn bool(&mut self, what: &str) -> Result<bool> {
        self.u8(what).map(|value| value != 0)
    }

    /// Read a byte.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is exhausted.
    pub fn u8(&mut self, what: &str) -> Result<u8> {
        self.read(what, ReadBytesExt::read_u8)
    }

    /// Read a little-endian `u16`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is too short.
    pub fn u16(&mut self, what: &str) -> Result<u16> {
        self.read(what, ReadBytesExt::read_u16::<LittleEndian>)
    }

    /// Read a little-endian `i16`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is too short.
    pub fn i16(&mut self, what: &str) -> Result<i16> {
        self.read(what, ReadBytesExt::read_i16::<LittleEndian>)
    }

    /// Read a little-endian `u32`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is too short.
    pub fn u32(&mut self, what: &str) -> Result<u32> {
        self.read(what, ReadBytesExt::read_u32::<LittleEndian>)
    }

    /// Read a little-endian `i32`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is too short.
    pub fn i32(&mut self, what: &str) -> Result<i32> {
        self.read(what, ReadBytesExt::read_i32::<LittleEndian>)
    }

    /// Read a little-endian IEEE-754 double.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is too short.
    pub fn f64(&mut self, what: &str) -> Result<f64> {
        self.read(what, ReadBytesExt::read_f64::<LittleEndian>)
    }

    /// Read a length-prefixed UTF-8 text field.
    ///
    /// The length byte is authoritative: the field must be complete.
    ///
    /// # Errors
    ///
    /// Returns an error if the field is truncated or not valid UTF-8.
    pub fn text(&mut self, what: &str) -> Result<String> {
        let len = usize::from(self.u8(what)?);
        if self.data.len() < len {
            return Err(Error::malformed(
                self.id,
                format!("{what} declares {len} bytes, {} available", self.data.len()),
            ));
        }
        let (text, rest) = self.data.split_at(len);
        self.data = rest;
        String::from_utf8(text.to_vec())
            .map_err(|_| Error::malformed(self.id, format!("{what} is not valid UTF-8")))
    }

    /// Read a flight start timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is too short.
    pub fn timestamp(&mut self) -> Result<FlightTimestamp> {
        Ok(FlightTimestamp {
            year: self.u8("year")?,
            month: self.u8("month")?,
            day: self.u8("day")?,
            hour: self.u8("hour")?,
            minute: self.u8("minute")?,
            second: self.u8("second")?,
            millis: self.u16("millis")?,
        })
    }

    /// Read the header fields of a first `read_flight` response.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is malformed.
    pub fn header(&mut self) -> Result<FlightHeader> {
        Ok(FlightHeader {
            timestamp: self.timestamp()?,
            glider: self.text("glider name")?,
            period_ms: self.u16("sample period")?,
        })
    }

    /// Read one telemetry sample.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is too short.
    pub fn sample(&mut self) -> Result<TelemetrySample> {
        let gnss = GnssData {
            valid: self.bool("gnss validity")?,
            latitude: self.f64("latitude")?,
            longitude: self.f64("longitude")?,
            altitude: self.i32("gnss altitude")?,
            speed: self.u32("speed")?,
            track_angle: self.u16("track angle")?,
        };
        let baro = BaroData {
            valid: self.bool("baro validity")?,
            pressure: self.u32("pressure")?,
            altitude: self.i32("baro altitude")?,
            temperature: self.i16("temperature")?,
        };
        Ok(TelemetrySample { gnss, baro })
    }
}

/// Device identity reported by `device_infos`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// User-visible device name.
    pub name: String,
    /// Hardware board name.
    pub board: String,
    /// Firmware version string.
    pub firmware_version: String,
}

impl DeviceInfo {
    /// Encode as a `device_infos` response payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = PayloadWriter::new();
        writer
            .put_text(&self.name)
            .put_text(&self.board)
            .put_text(&self.firmware_version);
        writer.into_bytes()
    }

    /// Decode a `device_infos` response payload.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the three text fields is malformed.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = PayloadReader::new(RequestId::DeviceInfos, payload);
        Ok(Self {
            name: reader.text("device name")?,
            board: reader.text("board name")?,
            firmware_version: reader.text("firmware version")?,
        })
    }
}

/// One recorded flight as reported by `list_flights_data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightListing {
    /// File name of the flight log.
    pub name: String,
    /// File size in bytes.
    pub size: u32,
}

impl FlightListing {
    /// Write the name and size fields.
    pub fn write_to(&self, writer: &mut PayloadWriter) {
        writer.put_text(&self.name).put_u32(self.size);
    }

    /// Read the name and size fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the fields are malformed.
    pub fn read_from(reader: &mut PayloadReader<'_>) -> Result<Self> {
        Ok(Self {
            name: reader.text("flight name")?,
            size: reader.u32("flight size")?,
        })
    }
}
