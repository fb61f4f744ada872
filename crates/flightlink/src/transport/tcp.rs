//! Serial link tunnelled over TCP.
//!
//! Lets the session run against a companion tool on the same host, or
//! behind a serial-to-TCP bridge such as `socat`.

use std::io::{self, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use super::SerialPort;
use crate::error::{Error, Result};

/// Shortest read timeout; a zero timeout would mean "block forever".
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// A [`SerialPort`] over a connected TCP stream.
#[derive(Debug)]
pub struct TcpSerialPort {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    peer: SocketAddr,
}

impl TcpSerialPort {
    /// Wrap an accepted or connected stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be configured or cloned.
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
            peer,
        })
    }

    /// Connect to a device at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] if no connection could be made.
    pub fn connect(addr: &str) -> Result<Self> {
        let connect_err = |source| Error::Connect {
            addr: addr.to_string(),
            source,
        };
        let addrs: Vec<SocketAddr> = addr.to_socket_addrs().map_err(connect_err)?.collect();
        let stream = TcpStream::connect(&addrs[..]).map_err(connect_err)?;
        debug!("Connected to {addr}");
        Self::new(stream).map_err(connect_err)
    }

    /// Address of the other end.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl SerialPort for TcpSerialPort {
    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        if self.reader.buffer().is_empty() {
            self.reader
                .get_ref()
                .set_read_timeout(Some(timeout.max(MIN_READ_TIMEOUT)))?;
        }
        let mut byte = [0u8; 1];
        match self.reader.read(&mut byte) {
            Ok(0) => Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
            Ok(_) => Ok(Some(byte[0])),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)?;
        self.writer.flush()
    }
}
