//! Adapter Protocol
//!
//! Implements the framed command protocol spoken by the Simma VNA2 USB adapter.
//!
//! The protocol carries configuration commands, acknowledgements, periodic
//! statistics and J1587 vehicle messages over a single escaped byte stream.

mod channel;
mod engine;
mod error;
pub mod frame;
pub mod messages;
pub mod serial;
pub mod stream;

pub use channel::{Channel, ChannelCounters, FrameReceiver, ReaderHandle};
pub use engine::{Protocol, ProtocolConfig, StatsMonitor, VehicleHandler};
pub use error::ProtocolError;
pub use frame::{encode_frame, unescape, Frame, FrameDecoder};
pub use messages::{Ack, Encode, Opcode, PassAllModeConfig, Stats, VehicleMessage};
pub use serial::{default_port_name, list_ports, open_port, PortInfo};
pub use stream::{PortStream, SerialStream};

/// Default baud rate of the adapter
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default time to wait for an acknowledgement, per attempt
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 3000;

/// Default number of writes before a command is given up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default port read timeout. Reads that time out only let the read worker
/// check whether it has been asked to stop.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

/// Maximum frame payload size (matches the adapter's receive buffer)
pub const MAX_FRAME_PAYLOAD: usize = 1024;
