//! In-process loopback link.

use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use super::SerialPort;

/// One end of an in-memory serial link.
///
/// Dropping one end makes the other see end of stream.
#[derive(Debug)]
pub struct ChannelSerialPort {
    rx: Receiver<u8>,
    tx: Sender<u8>,
}

impl ChannelSerialPort {
    /// Create two connected ends.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();
        (Self { rx: a_rx, tx: a_tx }, Self { rx: b_rx, tx: b_tx })
    }
}

impl SerialPort for ChannelSerialPort {
    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        match self.rx.recv_timeout(timeout) {
            Ok(byte) => Ok(Some(byte)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(io::Error::from(io::ErrorKind::UnexpectedEof))
            }
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        for &byte in bytes {
            self.tx
                .send(byte)
                .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        }
        Ok(())
    }
}
