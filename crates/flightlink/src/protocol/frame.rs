//! Frame encoding and the byte-stepped frame decoder.

use super::{Checksum, Request, RequestId, MAX_PAYLOAD_SIZE};
use crate::error::{Error, Result};

/// Start of frame magic, in wire order.
pub const START_OF_FRAME: [u8; 4] = [0x0D, 0xF0, 0xAD, 0x8B];

/// Bytes preceding the payload: magic, identifier and length.
pub const HEADER_SIZE: usize = START_OF_FRAME.len() + 1 + 2;

/// Size of the trailing checksum field.
pub const CHECKSUM_SIZE: usize = 2;

/// Encode a message into a complete frame.
///
/// # Errors
///
/// Returns [`Error::PayloadTooLarge`] if the payload exceeds
/// [`MAX_PAYLOAD_SIZE`].
pub fn encode_frame(id: RequestId, payload: &[u8]) -> Result<Vec<u8>> {
    let length = u16::try_from(payload.len())
        .ok()
        .filter(|len| usize::from(*len) <= MAX_PAYLOAD_SIZE)
        .ok_or(Error::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        })?;

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CHECKSUM_SIZE);
    frame.extend_from_slice(&START_OF_FRAME);
    frame.push(id.as_u8());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(payload);

    let checksum = Checksum::of(&frame);
    frame.extend_from_slice(&checksum.to_le_bytes());
    Ok(frame)
}

/// Decoder state, one per position in the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    /// Waiting for the first magic byte.
    WaitSof1,
    /// Waiting for the second magic byte.
    WaitSof2,
    /// Waiting for the third magic byte.
    WaitSof3,
    /// Waiting for the fourth magic byte.
    WaitSof4,
    /// Waiting for the identifier.
    WaitId,
    /// Waiting for the low length byte.
    WaitLen1,
    /// Waiting for the high length byte.
    WaitLen2,
    /// Collecting payload bytes.
    WaitPayload,
    /// Waiting for the low checksum byte.
    WaitCrc1,
    /// Waiting for the high checksum byte.
    WaitCrc2,
}

/// Why a partially decoded frame was thrown away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// A magic byte did not match.
    BadStartOfFrame,
    /// The identifier is not a known request.
    UnknownId(u8),
    /// The declared length exceeds the payload limit.
    LengthTooLarge(usize),
    /// The transmitted checksum does not match the computed one.
    ChecksumMismatch {
        /// Checksum computed over the received bytes.
        computed: u16,
        /// Checksum carried by the frame.
        received: u16,
    },
    /// No byte arrived within the inter-byte timeout.
    InterByteTimeout,
}

/// Outcome of feeding one byte to the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// More bytes are needed.
    Pending,
    /// The frame in progress was dropped; the decoder resynchronizes.
    Dropped(DropReason),
    /// A complete, valid frame was decoded.
    Complete(Request),
}

/// Byte-stepped frame decoder.
///
/// Holds at most one frame's payload. Any byte that breaks the frame
/// resets the decoder and is re-examined as a possible first magic byte,
/// so a valid frame following a partial magic sequence is still found.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecodeState,
    id: Option<RequestId>,
    length: usize,
    payload: Vec<u8>,
    checksum: Checksum,
    received_checksum: u16,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a decoder waiting for a start of frame.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: DecodeState::WaitSof1,
            id: None,
            length: 0,
            payload: Vec::new(),
            checksum: Checksum::new(),
            received_checksum: 0,
        }
    }

    /// Current decoder state.
    #[must_use]
    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// Whether no frame is in progress.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state == DecodeState::WaitSof1
    }

    /// Abandon any frame in progress.
    pub fn reset(&mut self) {
        self.state = DecodeState::WaitSof1;
        self.id = None;
        self.length = 0;
        self.payload.clear();
        self.checksum = Checksum::new();
        self.received_checksum = 0;
    }

    /// Abandon the frame in progress after the inter-byte timeout expired.
    ///
    /// Returns the drop reason if a frame was actually in progress.
    pub fn expire(&mut self) -> Option<DropReason> {
        if self.is_idle() {
            None
        } else {
            self.reset();
            Some(DropReason::InterByteTimeout)
        }
    }

    /// Feed one byte.
    pub fn push(&mut self, byte: u8) -> Step {
        match self.state {
            DecodeState::WaitSof1 => {
                self.rescan(byte);
                Step::Pending
            }
            DecodeState::WaitSof2 => self.expect_sof(byte, 1, DecodeState::WaitSof3),
            DecodeState::WaitSof3 => self.expect_sof(byte, 2, DecodeState::WaitSof4),
            DecodeState::WaitSof4 => self.expect_sof(byte, 3, DecodeState::WaitId),
            DecodeState::WaitId => match RequestId::from_u8(byte) {
                Some(id) => {
                    self.checksum.update(byte);
                    self.id = Some(id);
                    self.state = DecodeState::WaitLen1;
                    Step::Pending
                }
                None => self.drop_frame(byte, DropReason::UnknownId(byte)),
            },
            DecodeState::WaitLen1 => {
                self.checksum.update(byte);
                self.length = usize::from(byte);
                self.state = DecodeState::WaitLen2;
                Step::Pending
            }
            DecodeState::WaitLen2 => {
                let length = self.length | (usize::from(byte) << 8);
                if length > MAX_PAYLOAD_SIZE {
                    return self.drop_frame(byte, DropReason::LengthTooLarge(length));
                }
                self.checksum.update(byte);
                self.length = length;
                if length == 0 {
                    self.state = DecodeState::WaitCrc1;
                } else {
                    self.payload.reserve(length);
                    self.state = DecodeState::WaitPayload;
                }
                Step::Pending
            }
            DecodeState::WaitPayload => {
                self.checksum.update(byte);
                self.payload.push(byte);
                if self.payload.len() == self.length {
                    self.state = DecodeState::WaitCrc1;
                }
                Step::Pending
            }
            DecodeState::WaitCrc1 => {
                self.received_checksum = u16::from(byte);
                self.state = DecodeState::WaitCrc2;
                Step::Pending
            }
            DecodeState::WaitCrc2 => {
                let received = self.received_checksum | (u16::from(byte) << 8);
                let computed = self.checksum.value();
                match self.id {
                    Some(id) if received == computed => {
                        let payload = std::mem::take(&mut self.payload);
                        self.reset();
                        Step::Complete(Request::new(id, payload))
                    }
                    _ => self.drop_frame(byte, DropReason::ChecksumMismatch { computed, received }),
                }
            }
        }
    }

    fn expect_sof(&mut self, byte: u8, index: usize, next: DecodeState) -> Step {
        if byte == START_OF_FRAME[index] {
            self.checksum.update(byte);
            self.state = next;
            Step::Pending
        } else {
            self.drop_frame(byte, DropReason::BadStartOfFrame)
        }
    }

    fn drop_frame(&mut self, byte: u8, reason: DropReason) -> Step {
        self.reset();
        self.rescan(byte);
        Step::Dropped(reason)
    }

    /// Start a new frame if `byte` is the first magic byte. Only valid in
    /// the idle state.
    fn rescan(&mut self, byte: u8) {
        if byte == START_OF_FRAME[0] {
            self.checksum.update(byte);
            self.state = DecodeState::WaitSof2;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(decoder: &mut FrameDecoder, bytes: &[u8]) -> (Vec<Request>, Vec<DropReason>) {
        let mut requests = Vec::new();
        let mut drops = Vec::new();
        for &b in bytes {
            match decoder.push(b) {
                Step::Pending => {}
                Step::Dropped(reason) => drops.push(reason),
                Step::Complete(req) => requests.push(req),
            }
        }
        (requests, drops)
    }

    #[test]
    fn test_encode_empty_frame_bytes() {
        let frame = encode_frame(RequestId::DeviceInfos, &[]).unwrap();
        assert_eq!(
            frame,
            vec![0x0D, 0xF0, 0xAD, 0x8B, 0x01, 0x00, 0x00, 0xD8, 0x60]
        );
    }

    #[test]
    fn test_encode_length_is_little_endian() {
        let payload = vec![0xAA; 0x0123];
        let frame = encode_frame(RequestId::ReadFlightData, &payload).unwrap();
        assert_eq!(frame[5], 0x23);
        assert_eq!(frame[6], 0x01);
        assert_eq!(frame.len(), HEADER_SIZE + 0x0123 + CHECKSUM_SIZE);
    }

    #[test]
    fn test_encode_rejects_oversize_payload() {
        let payload = vec![0; MAX_PAYLOAD_SIZE + 1];
        let err = encode_frame(RequestId::ReadFlightData, &payload).unwrap_err();
        assert!(matches!(
            err,
            Error::PayloadTooLarge {
                size: 5001,
                max: 5000
            }
        ));
    }

    #[test]
    fn test_encode_accepts_payload_limit() {
        let payload = vec![0x55; MAX_PAYLOAD_SIZE];
        assert!(encode_frame(RequestId::ReadFlightData, &payload).is_ok());
    }

    #[test]
    fn test_decode_encoded_requests() {
        let requests = vec![
            Request::empty(RequestId::DeviceInfos),
            Request::empty(RequestId::ListFlights),
            Request::empty(RequestId::ListFlightsData),
            Request::new(RequestId::ReadFlight, b"\x0bflight1.rec".to_vec()),
            Request::new(RequestId::ReadFlightData, vec![0xFF; MAX_PAYLOAD_SIZE]),
        ];
        let mut decoder = FrameDecoder::new();
        for req in requests {
            let frame = encode_frame(req.id, &req.payload).unwrap();
            let (decoded, drops) = decode_all(&mut decoder, &frame);
            assert!(drops.is_empty());
            assert_eq!(decoded, vec![req]);
            assert!(decoder.is_idle());
        }
    }

    #[test]
    fn test_resync_after_short_noise() {
        let frame = encode_frame(RequestId::ListFlights, &[]).unwrap();
        for noise in [
            vec![0x00],
            vec![0x0D],
            vec![0x0D, 0xF0],
            vec![0x0D, 0xF0, 0xAD],
            vec![0x42, 0x0D, 0xF0],
        ] {
            let mut bytes = noise.clone();
            bytes.extend_from_slice(&frame);
            bytes.extend_from_slice(&[0x13, 0x37]);
            let mut decoder = FrameDecoder::new();
            let (decoded, _) = decode_all(&mut decoder, &bytes);
            assert_eq!(decoded, vec![Request::empty(RequestId::ListFlights)], "noise {noise:02X?}");
        }
    }

    #[test]
    fn test_bad_sof_is_dropped() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.push(0x0D), Step::Pending);
        assert_eq!(decoder.state(), DecodeState::WaitSof2);
        assert_eq!(decoder.push(0x00), Step::Dropped(DropReason::BadStartOfFrame));
        assert!(decoder.is_idle());
    }

    #[test]
    fn test_unknown_id_is_dropped() {
        let mut decoder = FrameDecoder::new();
        let (_, drops) = decode_all(&mut decoder, &[0x0D, 0xF0, 0xAD, 0x8B, 0x00]);
        assert_eq!(drops, vec![DropReason::UnknownId(0)]);

        let (_, drops) = decode_all(&mut decoder, &[0x0D, 0xF0, 0xAD, 0x8B, 0x06]);
        assert_eq!(drops, vec![DropReason::UnknownId(6)]);
    }

    #[test]
    fn test_oversize_length_never_produces_request() {
        for length in [5001u16, 5002, 0x8000, 0xFFFF] {
            let mut bytes = vec![0x0D, 0xF0, 0xAD, 0x8B, RequestId::ReadFlight.as_u8()];
            bytes.extend_from_slice(&length.to_le_bytes());
            bytes.extend(std::iter::repeat(0x00).take(64));
            let mut decoder = FrameDecoder::new();
            let (decoded, drops) = decode_all(&mut decoder, &bytes);
            assert!(decoded.is_empty());
            assert_eq!(drops, vec![DropReason::LengthTooLarge(usize::from(length))]);
            assert!(decoder.is_idle());
        }
    }

    #[test]
    fn test_corrupted_payload_bit_is_rejected() {
        let mut frame = encode_frame(RequestId::ReadFlight, b"\x05a.rec").unwrap();
        frame[HEADER_SIZE + 2] ^= 0x01;
        let mut decoder = FrameDecoder::new();
        let (decoded, drops) = decode_all(&mut decoder, &frame);
        assert!(decoded.is_empty());
        assert!(matches!(drops[..], [DropReason::ChecksumMismatch { .. }]));
    }

    #[test]
    fn test_corrupted_checksum_is_rejected() {
        let mut frame = encode_frame(RequestId::DeviceInfos, &[]).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0x80;
        let mut decoder = FrameDecoder::new();
        let (decoded, drops) = decode_all(&mut decoder, &frame);
        assert!(decoded.is_empty());
        assert_eq!(
            drops,
            vec![DropReason::ChecksumMismatch {
                computed: 0x60D8,
                received: 0xE0D8
            }]
        );
    }

    #[test]
    fn test_frame_after_rejected_frame_is_decoded() {
        let mut bad = encode_frame(RequestId::ListFlights, &[]).unwrap();
        bad[4] = 0x09;
        let good = encode_frame(RequestId::DeviceInfos, &[]).unwrap();
        let mut bytes = bad;
        bytes.extend_from_slice(&good);
        let mut decoder = FrameDecoder::new();
        let (decoded, _) = decode_all(&mut decoder, &bytes);
        assert_eq!(decoded, vec![Request::empty(RequestId::DeviceInfos)]);
    }

    #[test]
    fn test_short_payload_does_not_leak_previous_bytes() {
        let mut decoder = FrameDecoder::new();
        let long = encode_frame(RequestId::ReadFlight, &[0xEE; 300]).unwrap();
        let short = encode_frame(RequestId::ReadFlight, &[0x01, 0x02]).unwrap();
        let (first, _) = decode_all(&mut decoder, &long);
        let (second, _) = decode_all(&mut decoder, &short);
        assert_eq!(first[0].payload.len(), 300);
        assert_eq!(second[0].payload, vec![0x01, 0x02]);
    }

    #[test]
    fn test_expire_mid_frame() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.expire(), None);
        decoder.push(0x0D);
        decoder.push(0xF0);
        assert_eq!(decoder.expire(), Some(DropReason::InterByteTimeout));
        assert!(decoder.is_idle());
    }
}
