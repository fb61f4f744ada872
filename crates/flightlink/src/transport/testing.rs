//! Deterministic serial port and clock for tests.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{Clock, SerialPort};
use crate::protocol::{encode_frame, FrameDecoder, Request, Step};

/// A clock that only moves when told to.
#[derive(Debug, Clone, Default)]
pub(crate) struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub(crate) fn advance(&self, by: Duration) {
        let ms = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[derive(Debug)]
enum Event {
    Byte(u8),
    Silence(Duration),
    ReadError,
}

/// A serial port replaying a script of bytes and silences.
///
/// Bytes arrive instantly. Waiting on a silence, or on an exhausted script,
/// advances the shared clock by the time waited.
#[derive(Debug, Default)]
pub(crate) struct ScriptedPort {
    script: VecDeque<Event>,
    written: Vec<u8>,
    clock: ManualClock,
    close_when_drained: bool,
    fail_reads: bool,
    fail_writes: bool,
    read_attempts: usize,
}

impl ScriptedPort {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn clock(&self) -> ManualClock {
        self.clock.clone()
    }

    pub(crate) fn push_bytes(&mut self, bytes: &[u8]) {
        self.script.extend(bytes.iter().copied().map(Event::Byte));
    }

    pub(crate) fn push_request(&mut self, request: &Request) {
        self.push_bytes(&frame_bytes(request));
    }

    pub(crate) fn push_silence(&mut self, duration: Duration) {
        self.script.push_back(Event::Silence(duration));
    }

    /// Fail the next read with an error that is not a disconnect.
    pub(crate) fn push_read_error(&mut self) {
        self.script.push_back(Event::ReadError);
    }

    /// Fail every read, without consuming the script or the clock.
    pub(crate) fn fail_reads(&mut self) {
        self.fail_reads = true;
    }

    pub(crate) fn read_attempts(&self) -> usize {
        self.read_attempts
    }

    /// Report end of stream once the script is exhausted.
    pub(crate) fn close_when_drained(&mut self) {
        self.close_when_drained = true;
    }

    pub(crate) fn fail_writes(&mut self) {
        self.fail_writes = true;
    }

    pub(crate) fn written(&self) -> &[u8] {
        &self.written
    }

    /// Decode everything written so far.
    pub(crate) fn responses(&self) -> Vec<Request> {
        decode_all(&self.written)
    }
}

impl SerialPort for ScriptedPort {
    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        self.read_attempts += 1;
        if self.fail_reads {
            return Err(io::Error::new(io::ErrorKind::Other, "read failed"));
        }
        let mut waited = Duration::ZERO;
        loop {
            match self.script.pop_front() {
                Some(Event::Byte(byte)) => return Ok(Some(byte)),
                Some(Event::ReadError) => {
                    return Err(io::Error::new(io::ErrorKind::Other, "read failed"))
                }
                Some(Event::Silence(duration)) => {
                    let left = timeout - waited;
                    if duration > left {
                        self.clock.advance(left);
                        self.script.push_front(Event::Silence(duration - left));
                        return Ok(None);
                    }
                    self.clock.advance(duration);
                    waited += duration;
                }
                None if self.close_when_drained => {
                    return Err(io::Error::from(io::ErrorKind::UnexpectedEof))
                }
                None => {
                    self.clock.advance(timeout - waited);
                    return Ok(None);
                }
            }
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.fail_writes {
            return Err(io::Error::new(io::ErrorKind::Other, "write failed"));
        }
        self.written.extend_from_slice(bytes);
        Ok(())
    }
}

pub(crate) fn frame_bytes(request: &Request) -> Vec<u8> {
    encode_frame(request.id, &request.payload).unwrap()
}

pub(crate) fn decode_all(bytes: &[u8]) -> Vec<Request> {
    let mut decoder = FrameDecoder::new();
    bytes
        .iter()
        .filter_map(|&b| match decoder.push(b) {
            Step::Complete(request) => Some(request),
            _ => None,
        })
        .collect()
}
