//! Adapter messages
//!
//! Typed payloads exchanged with the adapter. Decoding functions take the full
//! frame payload, opcode byte included.

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

use super::ProtocolError;

/// PID marker announcing the extended (two byte) parameter identifier form
pub const EXTENDED_PID_MARKER: u8 = 255;

/// Payload opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Acknowledgement of a command (inbound)
    Ack = 0x00,
    /// J1587 message to transmit on the vehicle network (outbound)
    SendVehicleMessage = 0x08,
    /// Pass-all mode configuration (outbound)
    PassAllModeConfig = 0x12,
    /// J1587 message received from the vehicle network (inbound)
    VehicleMessage = 0x16,
    /// Periodic adapter statistics (inbound)
    Stats = 0x17,
}

impl Opcode {
    /// Look up the opcode for a payload's first byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Opcode::Ack),
            0x08 => Some(Opcode::SendVehicleMessage),
            0x12 => Some(Opcode::PassAllModeConfig),
            0x16 => Some(Opcode::VehicleMessage),
            0x17 => Some(Opcode::Stats),
            _ => None,
        }
    }

    /// Wire value
    pub fn byte(self) -> u8 {
        self as u8
    }
}

/// A message that can be sent to the adapter as a command
pub trait Encode {
    /// Encode the frame payload, opcode first
    fn encode(&self) -> Vec<u8>;
}

/// Pass-all mode configuration: selects which networks the adapter forwards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassAllModeConfig {
    /// Adapter port index
    pub port: u8,
    /// Forward raw J1708 traffic
    pub j1708: bool,
    /// Forward J1587 traffic
    pub j1587: bool,
    /// Forward CAN traffic
    pub can: bool,
    /// Forward J1939 traffic
    pub j1939: bool,
}

impl PassAllModeConfig {
    /// J1708 passthrough on the given port, everything else off
    pub fn j1708_only(port: u8) -> Self {
        Self {
            port,
            j1708: true,
            j1587: false,
            can: false,
            j1939: false,
        }
    }
}

impl Default for PassAllModeConfig {
    fn default() -> Self {
        Self::j1708_only(0)
    }
}

impl Encode for PassAllModeConfig {
    fn encode(&self) -> Vec<u8> {
        vec![
            Opcode::PassAllModeConfig.byte(),
            self.port,
            self.j1708 as u8,
            self.j1587 as u8,
            self.can as u8,
            self.j1939 as u8,
        ]
    }
}

/// Acknowledgement of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Opcode of the acknowledged command
    pub opcode: u8,
}

impl Ack {
    /// Encoded size
    pub const LEN: usize = 2;

    /// Decode from a frame payload
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() != Self::LEN {
            return Err(ProtocolError::LengthMismatch {
                kind: "ack",
                expected: Self::LEN,
                actual: payload.len(),
            });
        }
        Ok(Self { opcode: payload[1] })
    }
}

/// Cumulative adapter statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Stats {
    /// Valid J1708 messages received
    pub valid_j1708_messages: u32,
    /// Invalid J1708 bytes received
    pub invalid_j1708_bytes: u32,
    /// CAN frames received
    pub can_frames: u32,
    /// Adapter hardware version
    pub hardware_version: u8,
    /// Adapter firmware version
    pub software_version: u8,
}

impl Stats {
    /// Encoded size
    pub const LEN: usize = 15;

    /// Decode from a frame payload
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() != Self::LEN {
            return Err(ProtocolError::LengthMismatch {
                kind: "stats",
                expected: Self::LEN,
                actual: payload.len(),
            });
        }

        Ok(Self {
            valid_j1708_messages: BigEndian::read_u32(&payload[1..5]),
            invalid_j1708_bytes: BigEndian::read_u32(&payload[5..9]),
            can_frames: BigEndian::read_u32(&payload[9..13]),
            hardware_version: payload[13],
            software_version: payload[14],
        })
    }
}

/// A J1587 application message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleMessage {
    /// Message identifier (sending node)
    pub mid: u8,
    /// Parameter identifier; values above 255 use the extended form
    pub pid: u16,
    /// Parameter data
    pub data: Vec<u8>,
    /// Identifier and data bytes as carried on the network
    pub raw: Vec<u8>,
}

impl VehicleMessage {
    /// Smallest inbound payload: opcode, MID, PID
    pub const MIN_LEN: usize = 3;

    /// Build an outbound message. `raw` is reconstructed in the compact form.
    pub fn new(mid: u8, pid: u16, data: Vec<u8>) -> Self {
        let mut raw = Vec::with_capacity(data.len() + 3);
        raw.push(mid);
        if pid > 0xFF {
            raw.push(EXTENDED_PID_MARKER);
            raw.push((pid - 256) as u8);
        } else {
            raw.push(pid as u8);
        }
        raw.extend_from_slice(&data);

        Self {
            mid,
            pid,
            data,
            raw,
        }
    }

    /// Decode from an inbound frame payload.
    ///
    /// In the extended form the PID is taken from the byte after the page byte,
    /// which is also the first data byte. This mirrors the adapter tool's
    /// behavior and has not been checked against hardware.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() < Self::MIN_LEN {
            return Err(ProtocolError::TooShort {
                kind: "j1587",
                minimum: Self::MIN_LEN,
                actual: payload.len(),
            });
        }

        let mid = payload[1];

        if payload[2] == EXTENDED_PID_MARKER {
            if payload.len() < 5 {
                return Err(ProtocolError::TooShort {
                    kind: "extended j1587",
                    minimum: 5,
                    actual: payload.len(),
                });
            }

            let data = payload[4..].to_vec();
            let mut raw = vec![mid, EXTENDED_PID_MARKER, payload[3]];
            raw.extend_from_slice(&data);

            return Ok(Self {
                mid,
                pid: 256 + payload[4] as u16,
                data,
                raw,
            });
        }

        let data = payload[3..].to_vec();
        let mut raw = vec![mid, payload[2]];
        raw.extend_from_slice(&data);

        Ok(Self {
            mid,
            pid: payload[2] as u16,
            data,
            raw,
        })
    }
}

impl Encode for VehicleMessage {
    fn encode(&self) -> Vec<u8> {
        let [pid_hi, pid_lo] = self.pid.to_be_bytes();
        let mut payload = Vec::with_capacity(self.data.len() + 5);
        payload.extend_from_slice(&[
            Opcode::SendVehicleMessage.byte(),
            self.mid,
            pid_hi,
            pid_lo,
            0x04,
        ]);
        payload.extend_from_slice(&self.data);
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_opcode_bytes() {
        for opcode in [
            Opcode::Ack,
            Opcode::SendVehicleMessage,
            Opcode::PassAllModeConfig,
            Opcode::VehicleMessage,
            Opcode::Stats,
        ] {
            assert_eq!(Opcode::from_byte(opcode.byte()), Some(opcode));
        }
        assert_eq!(Opcode::from_byte(0x16), Some(Opcode::VehicleMessage));
        assert_eq!(Opcode::from_byte(0x42), None);
    }

    #[test]
    fn test_pass_all_encode() {
        let config = PassAllModeConfig {
            port: 1,
            j1708: true,
            j1587: false,
            can: true,
            j1939: false,
        };
        assert_eq!(config.encode(), vec![0x12, 1, 1, 0, 1, 0]);
        assert_eq!(
            PassAllModeConfig::default().encode(),
            vec![0x12, 0, 1, 0, 0, 0]
        );
    }

    #[test]
    fn test_ack_decode() {
        assert_eq!(Ack::decode(&[0x00, 0x12]).unwrap().opcode, 0x12);
        assert!(matches!(
            Ack::decode(&[0x00]),
            Err(ProtocolError::LengthMismatch {
                expected: 2,
                actual: 1,
                ..
            })
        ));
        assert!(Ack::decode(&[0x00, 0x12, 0x00]).is_err());
    }

    #[test]
    fn test_stats_decode() {
        let payload = [
            0x17, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x07, 0x01, 0x02, 0x03, 0x04, 2, 9,
        ];
        let stats = Stats::decode(&payload).unwrap();
        assert_eq!(
            stats,
            Stats {
                valid_j1708_messages: 256,
                invalid_j1708_bytes: 7,
                can_frames: 0x0102_0304,
                hardware_version: 2,
                software_version: 9,
            }
        );
    }

    #[test]
    fn test_stats_wrong_length() {
        assert!(matches!(
            Stats::decode(&[0x17; 11]),
            Err(ProtocolError::LengthMismatch {
                expected: 15,
                actual: 11,
                ..
            })
        ));
    }

    #[test]
    fn test_vehicle_message_compact() {
        let message = VehicleMessage::decode(&[0x16, 188, 128, 5]).unwrap();
        assert_eq!(message.mid, 188);
        assert_eq!(message.pid, 128);
        assert_eq!(message.data, vec![5]);
        assert_eq!(message.raw, vec![188, 128, 5]);
    }

    #[test]
    fn test_vehicle_message_no_data() {
        let message = VehicleMessage::decode(&[0x16, 188, 128]).unwrap();
        assert!(message.data.is_empty());
        assert_eq!(message.raw, vec![188, 128]);
    }

    #[test]
    fn test_vehicle_message_extended() {
        let message = VehicleMessage::decode(&[0x16, 188, 255, 1, 44]).unwrap();
        assert_eq!(message.mid, 188);
        assert_eq!(message.pid, 300);
        assert_eq!(message.data, vec![44]);
        assert_eq!(message.raw, vec![188, 255, 1, 44]);
    }

    #[test]
    fn test_vehicle_message_too_short() {
        assert!(matches!(
            VehicleMessage::decode(&[0x16, 188]),
            Err(ProtocolError::TooShort { minimum: 3, .. })
        ));
        assert!(matches!(
            VehicleMessage::decode(&[0x16, 188, 255, 1]),
            Err(ProtocolError::TooShort { minimum: 5, .. })
        ));
    }

    #[test]
    fn test_vehicle_message_encode() {
        let message = VehicleMessage::new(188, 128, vec![5]);
        assert_eq!(message.encode(), vec![0x08, 188, 0, 128, 4, 5]);
        assert_eq!(message.raw, vec![188, 128, 5]);

        let extended = VehicleMessage::new(188, 300, vec![]);
        assert_eq!(extended.encode(), vec![0x08, 188, 1, 44, 4]);
    }

    #[test]
    fn test_opcode_lookup() {
        assert_eq!(Opcode::from_byte(22), Some(Opcode::VehicleMessage));
        assert_eq!(Opcode::from_byte(23), Some(Opcode::Stats));
        assert_eq!(Opcode::from_byte(0x42), None);
        assert_eq!(Opcode::PassAllModeConfig.byte(), 0x12);
    }
}
