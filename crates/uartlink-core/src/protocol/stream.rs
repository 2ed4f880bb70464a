//! Byte transport beneath the framing layer
//!
//! [`UartLink`](super::UartLink) only talks to a [`CommunicationChannel`], so
//! tests and pseudo-terminal masters can stand in for a real port.

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;

/// Byte transport underneath a link
pub trait CommunicationChannel: Read + Write + Send {
    /// Set the device-level timeout for read/write operations
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Discard anything queued in either direction
    fn clear_buffers(&mut self) -> io::Result<()>;

    /// Get number of bytes available to read
    fn bytes_to_read(&mut self) -> io::Result<u32>;
}

/// [`CommunicationChannel`] over a `serialport` handle
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    /// Wrap an already configured port, e.g. from
    /// [`open_port`](super::serial::open_port) or `TTYPort::pair`
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl CommunicationChannel for SerialChannel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(io::Error::other)
    }

    fn clear_buffers(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::All)
            .map_err(io::Error::other)
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        self.port.bytes_to_read().map_err(io::Error::other)
    }
}
