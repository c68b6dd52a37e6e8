//! Protocol errors

use thiserror::Error;

/// Errors that can occur during adapter communication
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Failed reading from port '{port}': {source}")]
    ReadFailed {
        port: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Read worker stopped unexpectedly")]
    ReaderStopped,

    #[error("Not connected to adapter")]
    NotConnected,

    #[error("Session already running")]
    AlreadyRunning,

    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("Invalid escape sequence: 0xdb followed by {0:#04x}")]
    InvalidEscape(u8),

    #[error("Invalid frame length field: {0}")]
    InvalidFrameLength(u16),

    #[error("Frame too large: {length} bytes, maximum {max}")]
    FrameTooLarge { length: usize, max: usize },

    #[error("{kind} message should be {expected} bytes, got {actual}")]
    LengthMismatch {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{kind} message needs at least {minimum} bytes, got {actual}")]
    TooShort {
        kind: &'static str,
        minimum: usize,
        actual: usize,
    },

    #[error("No acknowledgement for opcode {opcode:#04x} after {attempts} attempts")]
    RetriesExhausted { opcode: u8, attempts: u32 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Partial write: wrote {written} of {expected} bytes")]
    PartialWrite { written: usize, expected: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether the error ends the session rather than a single frame or command
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::SerialError(_)
                | ProtocolError::PortNotFound(_)
                | ProtocolError::ReadFailed { .. }
                | ProtocolError::ReaderStopped
        )
    }
}
