//! Frame encoding/decoding
//!
//! Implements the adapter's framing with byte stuffing and an additive checksum.
//!
//! Frame format:
//! - 2 bytes: Length (big-endian), counting payload + checksum
//! - N bytes: Payload
//! - 1 byte: Checksum, the two's complement of the sum of length and payload bytes
//!
//! On the wire a frame starts with `0xC0` and every following byte is stuffed:
//! `0xC0` becomes `0xDB 0xDC`, `0xDB` becomes `0xDB 0xDD`.

use byteorder::{BigEndian, ByteOrder};

use super::{ProtocolError, MAX_FRAME_PAYLOAD};

/// Start of frame marker
pub const START_MARKER: u8 = 0xC0;
/// Escape byte
pub const ESCAPE: u8 = 0xDB;
/// Escaped form of [`START_MARKER`]
pub const ESCAPED_START: u8 = 0xDC;
/// Escaped form of [`ESCAPE`]
pub const ESCAPED_ESCAPE: u8 = 0xDD;

/// An unescaped protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame payload
    pub payload: Vec<u8>,
    /// Checksum over length and payload
    pub checksum: u8,
}

impl Frame {
    /// Create a new frame with the given payload
    pub fn new(payload: Vec<u8>) -> Result<Self, ProtocolError> {
        let length = length_field(payload.len())?;
        let checksum = checksum(length, &payload);
        Ok(Self { payload, checksum })
    }

    /// Value of the length field: payload plus checksum byte
    pub fn length(&self) -> u16 {
        (self.payload.len() + 1) as u16
    }

    /// Decode a frame from unescaped bytes (no start marker)
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < 3 {
            return Err(ProtocolError::TooShort {
                kind: "frame",
                minimum: 3,
                actual: data.len(),
            });
        }

        let length = BigEndian::read_u16(&data[0..2]);
        if length == 0 {
            return Err(ProtocolError::InvalidFrameLength(length));
        }

        let payload_len = length as usize - 1;
        if payload_len > MAX_FRAME_PAYLOAD {
            return Err(ProtocolError::FrameTooLarge {
                length: payload_len,
                max: MAX_FRAME_PAYLOAD,
            });
        }

        if data.len() != 2 + payload_len + 1 {
            return Err(ProtocolError::LengthMismatch {
                kind: "frame",
                expected: 2 + payload_len + 1,
                actual: data.len(),
            });
        }

        let payload = data[2..2 + payload_len].to_vec();
        let received = data[2 + payload_len];
        let expected = checksum(length, &payload);
        if received != expected {
            return Err(ProtocolError::ChecksumMismatch {
                expected,
                actual: received,
            });
        }

        Ok(Self {
            payload,
            checksum: received,
        })
    }

    /// Encode the frame to unescaped bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.payload.len() + 3);

        let mut len_bytes = [0u8; 2];
        BigEndian::write_u16(&mut len_bytes, self.length());
        bytes.extend_from_slice(&len_bytes);
        bytes.extend_from_slice(&self.payload);
        bytes.push(self.checksum);

        bytes
    }

    /// Encode the frame as it is sent: start marker followed by the stuffed bytes
    pub fn to_wire(&self) -> Vec<u8> {
        let mut wire = Vec::with_capacity(self.payload.len() * 2 + 7);
        self.write_wire(&mut wire);
        wire
    }

    /// Append the wire encoding to `out`
    pub(crate) fn write_wire(&self, out: &mut Vec<u8>) {
        out.push(START_MARKER);
        let mut len_bytes = [0u8; 2];
        BigEndian::write_u16(&mut len_bytes, self.length());
        escape_into(&len_bytes, out);
        escape_into(&self.payload, out);
        escape_into(&[self.checksum], out);
    }
}

/// Frame and escape a payload for transmission
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    Ok(Frame::new(payload.to_vec())?.to_wire())
}

/// Checksum over the length field and payload
pub fn checksum(length: u16, payload: &[u8]) -> u8 {
    let [hi, lo] = length.to_be_bytes();
    let sum = payload
        .iter()
        .fold(hi.wrapping_add(lo), |acc, b| acc.wrapping_add(*b));
    sum.wrapping_neg()
}

/// Stuff reserved bytes, appending to `out`
pub fn escape_into(data: &[u8], out: &mut Vec<u8>) {
    for &b in data {
        match b {
            START_MARKER => out.extend_from_slice(&[ESCAPE, ESCAPED_START]),
            ESCAPE => out.extend_from_slice(&[ESCAPE, ESCAPED_ESCAPE]),
            _ => out.push(b),
        }
    }
}

/// Reverse [`escape_into`] on a byte run that contains no start marker
pub fn unescape(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::with_capacity(data.len());
    let mut escaped = false;

    for &b in data {
        if escaped {
            escaped = false;
            out.push(match b {
                ESCAPED_START => START_MARKER,
                ESCAPED_ESCAPE => ESCAPE,
                other => return Err(ProtocolError::InvalidEscape(other)),
            });
        } else if b == ESCAPE {
            escaped = true;
        } else {
            out.push(b);
        }
    }

    if escaped {
        return Err(ProtocolError::TooShort {
            kind: "escape sequence",
            minimum: 2,
            actual: 1,
        });
    }

    Ok(out)
}

fn length_field(payload_len: usize) -> Result<u16, ProtocolError> {
    if payload_len > MAX_FRAME_PAYLOAD {
        return Err(ProtocolError::FrameTooLarge {
            length: payload_len,
            max: MAX_FRAME_PAYLOAD,
        });
    }
    Ok((payload_len + 1) as u16)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Idle,
    LengthHigh,
    LengthLow,
    Payload,
    Checksum,
}

/// Streaming receive state machine.
///
/// Bytes are pushed one at a time in arrival order. A start marker always
/// restarts framing, even in the middle of a frame, so the decoder
/// resynchronizes after line noise or a dropped byte.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecodeState,
    escaped: bool,
    length_bytes: [u8; 2],
    payload_len: usize,
    payload: Vec<u8>,
}

impl FrameDecoder {
    /// Create a decoder waiting for a start marker
    pub fn new() -> Self {
        Self {
            state: DecodeState::Idle,
            escaped: false,
            length_bytes: [0; 2],
            payload_len: 0,
            payload: Vec::new(),
        }
    }

    /// Whether the decoder is between frames
    pub fn is_idle(&self) -> bool {
        self.state == DecodeState::Idle
    }

    /// Push one raw byte.
    ///
    /// Returns `Some(Ok(payload))` when a frame completes with a valid checksum,
    /// `Some(Err(_))` when an in-progress frame is dropped, `None` otherwise.
    pub fn push(&mut self, byte: u8) -> Option<Result<Vec<u8>, ProtocolError>> {
        if byte == START_MARKER {
            self.escaped = false;
            self.state = DecodeState::LengthHigh;
            self.payload = Vec::new();
            return None;
        }

        if byte == ESCAPE {
            self.escaped = true;
            return None;
        }

        let byte = if self.escaped {
            self.escaped = false;
            match byte {
                ESCAPED_START => START_MARKER,
                ESCAPED_ESCAPE => ESCAPE,
                other => {
                    let in_frame = !self.is_idle();
                    self.abort();
                    return in_frame.then_some(Err(ProtocolError::InvalidEscape(other)));
                }
            }
        } else {
            byte
        };

        match self.state {
            DecodeState::Idle => None,
            DecodeState::LengthHigh => {
                self.length_bytes[0] = byte;
                self.state = DecodeState::LengthLow;
                None
            }
            DecodeState::LengthLow => {
                self.length_bytes[1] = byte;
                let length = BigEndian::read_u16(&self.length_bytes);
                if length == 0 {
                    self.abort();
                    return Some(Err(ProtocolError::InvalidFrameLength(length)));
                }

                self.payload_len = length as usize - 1;
                if self.payload_len > MAX_FRAME_PAYLOAD {
                    let length = self.payload_len;
                    self.abort();
                    return Some(Err(ProtocolError::FrameTooLarge {
                        length,
                        max: MAX_FRAME_PAYLOAD,
                    }));
                }

                self.payload = Vec::with_capacity(self.payload_len);
                self.state = if self.payload_len == 0 {
                    DecodeState::Checksum
                } else {
                    DecodeState::Payload
                };
                None
            }
            DecodeState::Payload => {
                self.payload.push(byte);
                if self.payload.len() == self.payload_len {
                    self.state = DecodeState::Checksum;
                }
                None
            }
            DecodeState::Checksum => {
                self.state = DecodeState::Idle;
                let length = BigEndian::read_u16(&self.length_bytes);
                let expected = checksum(length, &self.payload);
                let payload = std::mem::take(&mut self.payload);

                if byte == expected {
                    Some(Ok(payload))
                } else {
                    Some(Err(ProtocolError::ChecksumMismatch {
                        expected,
                        actual: byte,
                    }))
                }
            }
        }
    }

    /// Push a chunk of raw bytes, collecting every completed or dropped frame
    pub fn feed(&mut self, data: &[u8]) -> Vec<Result<Vec<u8>, ProtocolError>> {
        data.iter().filter_map(|&b| self.push(b)).collect()
    }

    fn abort(&mut self) {
        self.state = DecodeState::Idle;
        self.payload = Vec::new();
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn decode_all(wire: &[u8]) -> Vec<Result<Vec<u8>, ProtocolError>> {
        FrameDecoder::new().feed(wire)
    }

    #[test]
    fn test_frame_roundtrip() {
        let payload = vec![0x12, 0x00, 0x01, 0x00, 0x00, 0x00];
        let frame = Frame::new(payload.clone()).unwrap();
        let decoded = Frame::from_bytes(&frame.to_bytes()).expect("Should decode successfully");

        assert_eq!(decoded.payload, payload);
        assert_eq!(decoded.checksum, frame.checksum);
    }

    #[test]
    fn test_known_checksum() {
        // length 3 => 0x00 0x03, payload 0x00 0x12: sum 0x15, checksum 0xEB
        let frame = Frame::new(vec![0x00, 0x12]).unwrap();
        assert_eq!(frame.to_bytes(), vec![0x00, 0x03, 0x00, 0x12, 0xEB]);
    }

    #[test]
    fn test_checksum_zero_sum() {
        // length 1 and payload 0xFF sum to 0x100, checksum must be 0 not 256
        assert_eq!(checksum(1, &[0xFF]), 0x00);
    }

    #[test]
    fn test_wire_roundtrip() {
        let payload = vec![0x16, 188, 128, 5, 0xC0, 0xDB, 0x00];
        let wire = encode_frame(&payload).unwrap();

        let frames = decode_all(&wire);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap(), &payload);
    }

    #[test]
    fn test_wire_starts_with_single_marker() {
        let wire = encode_frame(&[0xC0, 0xC0]).unwrap();
        assert_eq!(wire[0], START_MARKER);
        assert!(!wire[1..].contains(&START_MARKER));
        assert_eq!(
            wire,
            vec![0xC0, 0x00, 0x03, 0xDB, 0xDC, 0xDB, 0xDC, 0x7D]
        );
    }

    #[test]
    fn test_corrupted_payload_is_dropped() {
        let payload = vec![1, 2, 3, 4, 5];
        let wire = encode_frame(&payload).unwrap();

        for i in 3..3 + payload.len() {
            let mut corrupted = wire.clone();
            corrupted[i] ^= 0x01;
            let frames = decode_all(&corrupted);
            assert_eq!(frames.len(), 1);
            assert!(matches!(
                frames[0],
                Err(ProtocolError::ChecksumMismatch { .. })
            ));
        }
    }

    #[test]
    fn test_from_bytes_rejects_corruption() {
        let mut bytes = Frame::new(vec![1, 2, 3, 4, 5]).unwrap().to_bytes();
        bytes[3] ^= 0xFF;
        assert!(Frame::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_escape_roundtrip() {
        let data = vec![0xC0, 0x01, 0xDB, 0xDB, 0xC0, 0xDC, 0xDD, 0xC0];
        let mut escaped = Vec::new();
        escape_into(&data, &mut escaped);

        assert!(!escaped.contains(&START_MARKER));
        assert_eq!(unescape(&escaped).unwrap(), data);
    }

    #[test]
    fn test_unescape_rejects_bad_sequence() {
        assert!(matches!(
            unescape(&[0x01, 0xDB, 0x42]),
            Err(ProtocolError::InvalidEscape(0x42))
        ));
        assert!(unescape(&[0x01, 0xDB]).is_err());
    }

    #[test]
    fn test_start_marker_resynchronizes() {
        let good = encode_frame(&[0x00, 0x12]).unwrap();

        // Half a frame, then a fresh one
        let mut wire = vec![0xC0, 0x00, 0x05, 0x16, 0x01];
        wire.extend_from_slice(&good);

        let frames = decode_all(&wire);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap(), &vec![0x00, 0x12]);
    }

    #[test]
    fn test_bad_escape_aborts_frame() {
        let good = encode_frame(&[0x00, 0x08]).unwrap();

        let mut wire = vec![0xC0, 0x00, 0x04, 0x16, 0xDB, 0x42, 0x01, 0x02];
        wire.extend_from_slice(&good);

        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(&wire);
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], Err(ProtocolError::InvalidEscape(0x42))));
        assert_eq!(frames[1].as_ref().unwrap(), &vec![0x00, 0x08]);
        assert!(decoder.is_idle());
    }

    #[test]
    fn test_bytes_outside_frame_are_ignored() {
        let mut wire = vec![0x01, 0x02, 0xDB, 0x42, 0x03];
        wire.extend_from_slice(&encode_frame(&[0x00, 0x12]).unwrap());

        let frames = decode_all(&wire);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_ok());
    }

    #[test]
    fn test_empty_payload() {
        let wire = encode_frame(&[]).unwrap();
        assert_eq!(wire, vec![0xC0, 0x00, 0x01, 0xFF]);

        let frames = decode_all(&wire);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].as_ref().unwrap().is_empty());
    }

    #[test]
    fn test_zero_length_field_dropped() {
        let frames = decode_all(&[0xC0, 0x00, 0x00, 0x00]);
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], Err(ProtocolError::InvalidFrameLength(0))));
    }

    #[test]
    fn test_oversized_frames_rejected() {
        assert!(Frame::new(vec![0; MAX_FRAME_PAYLOAD + 1]).is_err());

        let frames = decode_all(&[0xC0, 0xFF, 0xFF]);
        assert!(matches!(frames[0], Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_frames_split_across_reads() {
        let wire = encode_frame(&[0x17, 0xC0, 0xDB, 3]).unwrap();
        let mut decoder = FrameDecoder::new();

        let mut frames = Vec::new();
        for chunk in wire.chunks(3) {
            frames.extend(decoder.feed(chunk));
        }

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap(), &vec![0x17, 0xC0, 0xDB, 3]);
    }
}
