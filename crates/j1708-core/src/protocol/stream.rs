//! Byte stream abstraction over the adapter port

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;

/// A bidirectional byte port the channel can own.
///
/// The channel clones the stream once: one handle for the read worker, one for
/// writers. Reads should time out periodically (`io::ErrorKind::TimedOut`) so
/// the worker can notice shutdown.
pub trait PortStream: Read + Write + Send {
    /// Set timeout for read operations
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Discard any unread input
    fn clear_input_buffer(&mut self) -> io::Result<()>;

    /// Get an independent handle to the same port
    fn try_clone(&self) -> io::Result<Box<dyn PortStream>>;
}

/// Serial port wrapper implementing PortStream
pub struct SerialStream {
    port: Box<dyn SerialPort>,
}

impl SerialStream {
    /// Wrap an open serial port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }

    /// Name of the underlying port, if known
    pub fn name(&self) -> Option<String> {
        self.port.name()
    }
}

impl Read for SerialStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl PortStream for SerialStream {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(io::Error::other)
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::other)
    }

    fn try_clone(&self) -> io::Result<Box<dyn PortStream>> {
        let port_clone = self.port.try_clone().map_err(io::Error::other)?;
        Ok(Box::new(SerialStream::new(port_clone)))
    }
}
