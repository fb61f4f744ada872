//! Maintenance link transport.
//!
//! [`Transport`] owns the serial port. It turns the incoming byte stream
//! into [`Request`] values and frames outgoing ones. It knows nothing about
//! what the messages mean.

pub mod channel;
pub mod tcp;

#[cfg(test)]
pub(crate) mod testing;

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{encode_frame, FrameDecoder, Request, RequestId, Step};

pub use channel::ChannelSerialPort;
pub use tcp::TcpSerialPort;

/// Default maximum gap between two bytes of the same frame.
pub const DEFAULT_INTER_BYTE_TIMEOUT: Duration = Duration::from_millis(500);

/// A blocking, full-duplex byte channel.
pub trait SerialPort {
    /// Wait up to `timeout` for one byte.
    ///
    /// Returns `Ok(None)` if nothing arrived in time.
    ///
    /// # Errors
    ///
    /// Returns an error if the port failed. Errors of kind
    /// `UnexpectedEof`, `ConnectionReset`, `ConnectionAborted` or
    /// `BrokenPipe` mean the peer is gone.
    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>>;

    /// Write all bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the write failed. Part of the bytes may have been
    /// written.
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;
}

impl<P: SerialPort + ?Sized> SerialPort for Box<P> {
    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        (**self).read_byte(timeout)
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write_all(bytes)
    }
}

/// A monotonic millisecond clock.
pub trait Clock {
    /// Milliseconds since an arbitrary, fixed origin.
    fn now_ms(&self) -> u64;

    /// Block for `duration`.
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// [`Clock`] backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock whose origin is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Whether an I/O error means the other end of the link went away.
#[must_use]
pub fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}

/// Framed message transport over a [`SerialPort`].
#[derive(Debug)]
pub struct Transport<P, C = MonotonicClock> {
    port: P,
    clock: C,
    decoder: FrameDecoder,
    inter_byte_timeout: Duration,
}

impl<P: SerialPort> Transport<P> {
    /// Create a transport using the system monotonic clock.
    #[must_use]
    pub fn new(port: P, inter_byte_timeout: Duration) -> Self {
        Self::with_clock(port, MonotonicClock::new(), inter_byte_timeout)
    }
}

impl<P: SerialPort, C: Clock> Transport<P, C> {
    /// Create a transport with an explicit clock.
    #[must_use]
    pub fn with_clock(port: P, clock: C, inter_byte_timeout: Duration) -> Self {
        Self {
            port,
            clock,
            decoder: FrameDecoder::new(),
            inter_byte_timeout,
        }
    }

    /// The underlying port.
    #[must_use]
    pub fn port(&self) -> &P {
        &self.port
    }

    /// The underlying port, mutably.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the transport, returning the port.
    #[must_use]
    pub fn into_port(self) -> P {
        self.port
    }

    /// Wait up to `timeout` for a complete, valid frame.
    ///
    /// Returns `Ok(None)` when the timeout elapses first. Invalid frames are
    /// dropped silently and never reported; a frame whose bytes stop
    /// arriving for longer than the inter-byte timeout is dropped as well.
    /// A failing port drops the partial frame and is retried after the
    /// wait it failed on, at most the inter-byte timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LinkClosed`] if the peer disconnected.
    pub fn receive(&mut self, timeout: Duration) -> Result<Option<Request>> {
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let deadline = self.clock.now_ms().saturating_add(timeout_ms);

        loop {
            let now = self.clock.now_ms();
            if now >= deadline {
                self.expire();
                return Ok(None);
            }

            let remaining = Duration::from_millis(deadline - now);
            let wait = if self.decoder.is_idle() {
                remaining
            } else {
                remaining.min(self.inter_byte_timeout)
            };

            match self.port.read_byte(wait) {
                Ok(Some(byte)) => match self.decoder.push(byte) {
                    Step::Pending => {}
                    Step::Dropped(reason) => trace!(?reason, "Dropped frame"),
                    Step::Complete(request) => {
                        trace!(
                            id = %request.id,
                            len = request.payload.len(),
                            "Received frame"
                        );
                        return Ok(Some(request));
                    }
                },
                Ok(None) => self.expire(),
                Err(e) if is_disconnect(&e) => {
                    self.decoder.reset();
                    return Err(Error::LinkClosed);
                }
                Err(e) => {
                    warn!(error = %e, "Serial read failed");
                    self.decoder.reset();
                    self.clock.sleep(wait.min(self.inter_byte_timeout));
                }
            }
        }
    }

    /// Frame and write one message.
    ///
    /// Returns `Ok(false)` if the write failed; the rest of that frame is
    /// abandoned and never retried.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PayloadTooLarge`] if the payload exceeds the frame
    /// limit.
    pub fn send(&mut self, id: RequestId, payload: &[u8]) -> Result<bool> {
        let frame = encode_frame(id, payload)?;
        match self.port.write_all(&frame) {
            Ok(()) => {
                trace!(%id, len = payload.len(), "Sent frame");
                Ok(true)
            }
            Err(e) => {
                warn!(%id, error = %e, "Serial write failed");
                Ok(false)
            }
        }
    }

    /// Frame and write a [`Request`].
    ///
    /// # Errors
    ///
    /// Same as [`Transport::send`].
    pub fn send_request(&mut self, request: &Request) -> Result<bool> {
        self.send(request.id, &request.payload)
    }

    fn expire(&mut self) {
        if let Some(reason) = self.decoder.expire() {
            trace!(?reason, "Dropped frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{frame_bytes, ManualClock, ScriptedPort};
    use super::*;
    use crate::protocol::MAX_PAYLOAD_SIZE;

    fn transport(port: ScriptedPort) -> Transport<ScriptedPort, ManualClock> {
        let clock = port.clock();
        Transport::with_clock(port, clock, DEFAULT_INTER_BYTE_TIMEOUT)
    }

    #[test]
    fn test_receive_complete_frame() {
        let mut port = ScriptedPort::new();
        port.push_request(&Request::new(RequestId::ReadFlight, b"\x05a.rec".to_vec()));
        let mut transport = transport(port);

        let request = transport.receive(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(request.id, RequestId::ReadFlight);
        assert_eq!(request.payload, b"\x05a.rec");
    }

    #[test]
    fn test_receive_times_out_with_none() {
        let port = ScriptedPort::new();
        let clock = port.clock();
        let mut transport = transport(port);

        assert!(transport.receive(Duration::from_millis(1000)).unwrap().is_none());
        assert_eq!(clock.now_ms(), 1000);
    }

    #[test]
    fn test_receive_skips_noise() {
        let mut port = ScriptedPort::new();
        port.push_bytes(&[0x00, 0x0D, 0xF0, 0x42]);
        port.push_request(&Request::empty(RequestId::DeviceInfos));
        let mut transport = transport(port);

        let request = transport.receive(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(request, Request::empty(RequestId::DeviceInfos));
    }

    #[test]
    fn test_inter_byte_timeout_drops_partial_frame() {
        let frame = frame_bytes(&Request::empty(RequestId::ListFlights));
        let mut port = ScriptedPort::new();
        port.push_bytes(&frame[..5]);
        port.push_silence(Duration::from_millis(600));
        port.push_bytes(&frame[5..]);
        port.push_request(&Request::empty(RequestId::DeviceInfos));
        let mut transport = transport(port);

        // the stalled list_flights frame is lost, the next one is not
        let request = transport.receive(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(request.id, RequestId::DeviceInfos);
    }

    #[test]
    fn test_gap_below_inter_byte_timeout_is_tolerated() {
        let frame = frame_bytes(&Request::empty(RequestId::ListFlights));
        let mut port = ScriptedPort::new();
        port.push_bytes(&frame[..5]);
        port.push_silence(Duration::from_millis(400));
        port.push_bytes(&frame[5..]);
        let mut transport = transport(port);

        let request = transport.receive(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(request.id, RequestId::ListFlights);
    }

    #[test]
    fn test_oversize_length_never_dispatched() {
        let mut port = ScriptedPort::new();
        // declared length 5001
        port.push_bytes(&[0x0D, 0xF0, 0xAD, 0x8B, 0x04, 0x89, 0x13]);
        port.push_bytes(&[0xAA; 64]);
        let mut transport = transport(port);

        assert!(transport.receive(Duration::from_secs(2)).unwrap().is_none());
    }

    #[test]
    fn test_corrupted_bit_is_rejected() {
        let mut frame = frame_bytes(&Request::new(RequestId::ReadFlight, b"\x05a.rec".to_vec()));
        frame[9] ^= 0x04;
        let mut port = ScriptedPort::new();
        port.push_bytes(&frame);
        let mut transport = transport(port);

        assert!(transport.receive(Duration::from_secs(2)).unwrap().is_none());
    }

    #[test]
    fn test_disconnect_is_link_closed() {
        let mut port = ScriptedPort::new();
        port.close_when_drained();
        let mut transport = transport(port);

        let err = transport.receive(Duration::from_secs(1)).unwrap_err();
        assert!(err.is_link_closed());
    }

    #[test]
    fn test_read_error_drops_partial_frame_and_retries() {
        let frame = frame_bytes(&Request::empty(RequestId::ListFlights));
        let mut port = ScriptedPort::new();
        port.push_bytes(&frame[..5]);
        port.push_read_error();
        port.push_bytes(&frame[5..]);
        port.push_request(&Request::empty(RequestId::DeviceInfos));
        let clock = port.clock();
        let mut transport = transport(port);

        let request = transport.receive(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(request.id, RequestId::DeviceInfos);
        assert_eq!(clock.now_ms(), 500);
    }

    #[test]
    fn test_failing_port_waits_out_the_timeout() {
        let mut port = ScriptedPort::new();
        port.fail_reads();
        let clock = port.clock();
        let mut transport = transport(port);

        assert!(transport.receive(Duration::from_millis(1200)).unwrap().is_none());
        assert_eq!(clock.now_ms(), 1200);
        assert_eq!(transport.port().read_attempts(), 3);
    }

    #[test]
    fn test_send_writes_frame() {
        let mut transport = transport(ScriptedPort::new());
        assert!(transport.send(RequestId::DeviceInfos, &[]).unwrap());
        assert_eq!(
            transport.port().written(),
            &[0x0D, 0xF0, 0xAD, 0x8B, 0x01, 0x00, 0x00, 0xD8, 0x60]
        );
    }

    #[test]
    fn test_send_write_failure_is_reported() {
        let mut port = ScriptedPort::new();
        port.fail_writes();
        let mut transport = transport(port);
        assert!(!transport.send(RequestId::DeviceInfos, &[]).unwrap());
    }

    #[test]
    fn test_send_oversize_payload_is_error() {
        let mut transport = transport(ScriptedPort::new());
        let err = transport
            .send(RequestId::ReadFlightData, &vec![0; MAX_PAYLOAD_SIZE + 1])
            .unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { .. }));
        assert!(transport.port().written().is_empty());
    }

    #[test]
    fn test_send_then_receive_over_loopback() {
        let (a, b) = ChannelSerialPort::pair();
        let mut left = Transport::new(a, DEFAULT_INTER_BYTE_TIMEOUT);
        let mut right = Transport::new(b, DEFAULT_INTER_BYTE_TIMEOUT);

        let request = Request::new(RequestId::ListFlightsData, vec![1, 2, 3]);
        assert!(left.send_request(&request).unwrap());
        assert_eq!(right.receive(Duration::from_secs(1)).unwrap(), Some(request));
    }

    #[test]
    fn test_is_disconnect() {
        assert!(is_disconnect(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(is_disconnect(&io::Error::from(io::ErrorKind::UnexpectedEof)));
        assert!(!is_disconnect(&io::Error::from(io::ErrorKind::TimedOut)));
    }

    #[test]
    fn test_monotonic_clock_does_not_go_back() {
        let clock = MonotonicClock::new();
        let first = clock.now_ms();
        assert!(clock.now_ms() >= first);
    }
}
