//! Flight log files.
//!
//! A flight log is written once by the flight recorder and only read here.
//! Layout, all little-endian:
//!
//! ```text
//! magic: u32 = 0xBEEFF00D
//! header: year(u8, since 2000) month(u8) day(u8) hour(u8) minute(u8)
//!         second(u8) millis(u16) glider([u8; 32], NUL padded) period_ms(u16)
//! entry*: gnss_valid(u8) latitude(f64) longitude(f64) gnss_altitude(i32)
//!         speed(u32) track_angle(u16) baro_valid(u8) pressure(u32)
//!         baro_altitude(i32) temperature(i16) sink_rate(i16) glide_ratio(u16)
//! ```
//!
//! Entries are read sequentially. There is no rewind; reopen the file to
//! read it again.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::FlightFileError;
use crate::storage::FileSystem;

/// Magic number at the start of every flight log.
pub const MAGIC_NUMBER: u32 = 0xBEEF_F00D;

/// Size of the glider name field in the header.
pub const GLIDER_NAME_SIZE: usize = 32;

/// Size of the header, magic number included.
pub const HEADER_SIZE: usize = 4 + 8 + GLIDER_NAME_SIZE + 2;

/// Size of one entry on disk.
pub const ENTRY_SIZE: usize = 42;

/// Flight start date and time, UTC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightTimestamp {
    /// Year since 2000.
    pub year: u8,
    /// Month (1 - 12).
    pub month: u8,
    /// Day (1 - 31).
    pub day: u8,
    /// Hour (0 - 23).
    pub hour: u8,
    /// Minute (0 - 59).
    pub minute: u8,
    /// Second (0 - 59).
    pub second: u8,
    /// Milliseconds (0 - 999).
    pub millis: u16,
}

impl FlightTimestamp {
    /// Convert to a calendar date and time, if the fields form a valid one.
    #[must_use]
    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(
            2000 + i32::from(self.year),
            u32::from(self.month),
            u32::from(self.day),
        )?
        .and_hms_milli_opt(
            u32::from(self.hour),
            u32::from(self.minute),
            u32::from(self.second),
            u32::from(self.millis),
        )
    }
}

impl std::fmt::Display for FlightTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.3f")),
            None => write!(
                f,
                "{}/{}/{} {}:{}:{}.{} (invalid)",
                self.year, self.month, self.day, self.hour, self.minute, self.second, self.millis
            ),
        }
    }
}

/// Flight log header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightHeader {
    /// Flight start.
    pub timestamp: FlightTimestamp,
    /// Glider name.
    pub glider: String,
    /// Sample period in milliseconds.
    pub period_ms: u16,
}

/// Satellite navigation part of a sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GnssData {
    /// Whether the fix was valid.
    pub valid: bool,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Altitude, 1 = 0.1 m.
    pub altitude: i32,
    /// Ground speed, 1 = 0.1 m/s.
    pub speed: u32,
    /// Track angle, 1 = 0.1 degree.
    pub track_angle: u16,
}

/// Barometric part of a sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaroData {
    /// Whether the measurement was valid.
    pub valid: bool,
    /// Pressure in Pa.
    pub pressure: u32,
    /// Altitude, 1 = 0.1 m.
    pub altitude: i32,
    /// Temperature, 1 = 0.1 degree C.
    pub temperature: i16,
}

/// The sensor readings of one entry, as carried on the maintenance link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Satellite navigation data.
    pub gnss: GnssData,
    /// Barometric data.
    pub baro: BaroData,
}

/// One flight log entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FlightEntry {
    /// Satellite navigation data.
    pub gnss: GnssData,
    /// Barometric data.
    pub baro: BaroData,
    /// Sink rate, 1 = 1 cm/s.
    pub sink_rate: i16,
    /// Glide ratio, 1 = 0.1.
    pub glide_ratio: u16,
}

impl FlightEntry {
    /// The sensor readings of this entry.
    #[must_use]
    pub fn telemetry(&self) -> TelemetrySample {
        TelemetrySample {
            gnss: self.gnss,
            baro: self.baro,
        }
    }

    fn read_from(reader: &mut impl Read) -> io::Result<Self> {
        let mut raw = [0u8; ENTRY_SIZE];
        reader.read_exact(&mut raw)?;
        let mut buf = &raw[..];
        Ok(Self {
            gnss: GnssData {
                valid: buf.read_u8()? != 0,
                latitude: buf.read_f64::<LittleEndian>()?,
                longitude: buf.read_f64::<LittleEndian>()?,
                altitude: buf.read_i32::<LittleEndian>()?,
                speed: buf.read_u32::<LittleEndian>()?,
                track_angle: buf.read_u16::<LittleEndian>()?,
            },
            baro: BaroData {
                valid: buf.read_u8()? != 0,
                pressure: buf.read_u32::<LittleEndian>()?,
                altitude: buf.read_i32::<LittleEndian>()?,
                temperature: buf.read_i16::<LittleEndian>()?,
            },
            sink_rate: buf.read_i16::<LittleEndian>()?,
            glide_ratio: buf.read_u16::<LittleEndian>()?,
        })
    }
}

/// A flight log opened for sequential reading.
///
/// Opening validates the magic number and reads the header; a value of
/// this type therefore always has a valid header. Dropping it, or calling
/// [`FlightFile::close`], releases the file handle.
#[derive(Debug)]
pub struct FlightFile<R> {
    path: PathBuf,
    header: FlightHeader,
    reader: R,
    entries_read: usize,
}

impl<R: Read> FlightFile<R> {
    /// Open the flight log at `path` on the given file system.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, does not start with
    /// [`MAGIC_NUMBER`], or its header is truncated.
    pub fn open<F>(fs: &F, path: &Path) -> Result<Self, FlightFileError>
    where
        F: FileSystem<File = R>,
    {
        let reader = fs.open(path).map_err(|source| FlightFileError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(path, reader)
    }

    /// Read the header from an already open reader.
    ///
    /// # Errors
    ///
    /// Returns an error if the magic number or header is invalid.
    pub fn from_reader(path: &Path, mut reader: R) -> Result<Self, FlightFileError> {
        let map_err = |source: io::Error| {
            if source.kind() == io::ErrorKind::UnexpectedEof {
                FlightFileError::TruncatedHeader {
                    path: path.to_path_buf(),
                }
            } else {
                FlightFileError::Open {
                    path: path.to_path_buf(),
                    source,
                }
            }
        };

        let magic = reader.read_u32::<LittleEndian>().map_err(map_err)?;
        if magic != MAGIC_NUMBER {
            return Err(FlightFileError::BadMagic {
                path: path.to_path_buf(),
                found: magic,
            });
        }

        let mut raw = [0u8; HEADER_SIZE - 4];
        reader.read_exact(&mut raw).map_err(map_err)?;
        let header = parse_header(&raw);

        Ok(Self {
            path: path.to_path_buf(),
            header,
            reader,
            entries_read: 0,
        })
    }

    /// Path this flight log was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The flight header.
    #[must_use]
    pub fn header(&self) -> &FlightHeader {
        &self.header
    }

    /// Number of entries read so far.
    #[must_use]
    pub fn entries_read(&self) -> usize {
        self.entries_read
    }

    /// Read the next entry, or `None` at end of file.
    ///
    /// A trailing partial entry counts as end of file.
    ///
    /// # Errors
    ///
    /// Returns any I/O error other than end of file.
    pub fn read_entry(&mut self) -> io::Result<Option<FlightEntry>> {
        match FlightEntry::read_from(&mut self.reader) {
            Ok(entry) => {
                self.entries_read += 1;
                Ok(Some(entry))
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Close the file.
    pub fn close(self) {
        drop(self);
    }
}

impl<R: Read> Iterator for FlightFile<R> {
    type Item = io::Result<FlightEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_entry().transpose()
    }
}

fn parse_header(raw: &[u8; HEADER_SIZE - 4]) -> FlightHeader {
    let glider_field = &raw[8..8 + GLIDER_NAME_SIZE];
    let glider_len = glider_field
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(GLIDER_NAME_SIZE);

    FlightHeader {
        timestamp: FlightTimestamp {
            year: raw[0],
            month: raw[1],
            day: raw[2],
            hour: raw[3],
            minute: raw[4],
            second: raw[5],
            millis: u16::from_le_bytes([raw[6], raw[7]]),
        },
        glider: String::from_utf8_lossy(&glider_field[..glider_len]).into_owned(),
        period_ms: u16::from_le_bytes([raw[HEADER_SIZE - 6], raw[HEADER_SIZE - 5]]),
    }
}
