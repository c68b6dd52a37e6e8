//! J1587 messages as handed to consumers

use serde::{Deserialize, Serialize};

use crate::protocol::VehicleMessage;

/// A message received from the vehicle network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct J1587Message {
    /// Message identifier
    pub mid: u8,
    /// Parameter identifier
    pub pid: u16,
    /// Parameter data
    pub data: Vec<u8>,
    /// Identifier and data bytes as carried on the network
    pub raw: Vec<u8>,
}

impl From<VehicleMessage> for J1587Message {
    fn from(m: VehicleMessage) -> Self {
        Self {
            mid: m.mid,
            pid: m.pid,
            data: m.data,
            raw: m.raw,
        }
    }
}
