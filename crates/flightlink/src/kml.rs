//! KML export of a flight track.
//!
//! The document holds a takeoff and a landing placemark and the track as an
//! absolute-altitude line string, ready for Google Earth. Only samples with
//! a valid satellite fix are plotted.

use std::fmt;

use crate::flight_file::{FlightHeader, GnssData};

const KML_NAMESPACE: &str = "http://www.opengis.net/kml/2.2";

/// Track line colour, `aabbggrr`.
const TRACK_COLOR: &str = "7F0000FF";

const TRACK_WIDTH: u32 = 6;

/// A KML document for one flight.
///
/// Render it with [`ToString::to_string`] or any formatting macro.
#[derive(Debug, Clone)]
pub struct Kml<'a> {
    header: &'a FlightHeader,
    track: Vec<&'a GnssData>,
}

impl<'a> Kml<'a> {
    /// Build the document from a header and the fixes of the flight, in
    /// recording order.
    #[must_use]
    pub fn new(header: &'a FlightHeader, fixes: impl IntoIterator<Item = &'a GnssData>) -> Self {
        Self {
            header,
            track: fixes.into_iter().filter(|fix| fix.valid).collect(),
        }
    }

    /// Number of fixes plotted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.track.len()
    }

    /// Whether no valid fix was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.track.is_empty()
    }
}

impl fmt::Display for Kml<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
        writeln!(f, r#"<kml xmlns="{KML_NAMESPACE}">"#)?;
        writeln!(f, "\t<Document>")?;
        writeln!(
            f,
            "\t\t<name>Flight with glider {} - {}</name>",
            Escaped(&self.header.glider),
            self.header.timestamp
        )?;
        writeln!(f, "\t\t<Style id=\"track\">")?;
        writeln!(
            f,
            "\t\t\t<LineStyle><color>{TRACK_COLOR}</color><width>{TRACK_WIDTH}</width></LineStyle>"
        )?;
        writeln!(f, "\t\t</Style>")?;

        if let (Some(takeoff), Some(landing)) = (self.track.first(), self.track.last()) {
            write_point(f, "Takeoff", takeoff)?;
            write_point(f, "Landing", landing)?;

            writeln!(f, "\t\t<Placemark>")?;
            writeln!(f, "\t\t\t<styleUrl>#track</styleUrl>")?;
            writeln!(f, "\t\t\t<LineString>")?;
            writeln!(f, "\t\t\t\t<altitudeMode>absolute</altitudeMode>")?;
            writeln!(f, "\t\t\t\t<coordinates>")?;
            for fix in &self.track {
                writeln!(f, "\t\t\t\t\t{}", Coordinates(fix))?;
            }
            writeln!(f, "\t\t\t\t</coordinates>")?;
            writeln!(f, "\t\t\t</LineString>")?;
            writeln!(f, "\t\t</Placemark>")?;
        }

        writeln!(f, "\t</Document>")?;
        write!(f, "</kml>")
    }
}

fn write_point(f: &mut fmt::Formatter<'_>, name: &str, fix: &GnssData) -> fmt::Result {
    writeln!(f, "\t\t<Placemark>")?;
    writeln!(f, "\t\t\t<name>{name}</name>")?;
    writeln!(f, "\t\t\t<Point>")?;
    writeln!(f, "\t\t\t\t<coordinates>{}</coordinates>", Coordinates(fix))?;
    writeln!(f, "\t\t\t</Point>")?;
    writeln!(f, "\t\t</Placemark>")
}

/// `longitude,latitude,altitude` with the altitude in whole metres.
struct Coordinates<'a>(&'a GnssData);

impl fmt::Display for Coordinates<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.6},{:.6},{}",
            self.0.longitude,
            self.0.latitude,
            self.0.altitude / 10
        )
    }
}

/// XML character data.
struct Escaped<'a>(&'a str);

impl fmt::Display for Escaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.0.chars() {
            match c {
                '&' => f.write_str("&amp;")?,
                '<' => f.write_str("&lt;")?,
                '>' => f.write_str("&gt;")?,
                '"' => f.write_str("&quot;")?,
                '\'' => f.write_str("&apos;")?,
                c => write!(f, "{c}")?,
            }
        }
        Ok(())
    }
}
