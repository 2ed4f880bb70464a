//! Protocol errors

use thiserror::Error;

/// Errors that can occur while configuring or using a link
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid link configuration: {0}")]
    InvalidConfig(String),

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Failed to open {device}: {reason}")]
    OpenFailed { device: String, reason: String },

    #[error("Link is already open")]
    AlreadyOpen,

    #[error("Link is not open")]
    NotConnected,

    #[error("Payload of {length} bytes exceeds max packet size {max}")]
    PacketTooLarge { length: usize, max: u8 },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read timed out")]
    Timeout,

    #[error("Stream ended before the frame was complete")]
    Incomplete,

    #[error("Buffer overflow: frame declares {declared} bytes, buffer holds {capacity}")]
    BufferOverflow { declared: usize, capacity: usize },

    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// True for failures raised while opening or configuring the device,
    /// as opposed to runtime send/receive failures.
    pub fn is_open_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::InvalidConfig(_)
                | ProtocolError::PortNotFound(_)
                | ProtocolError::OpenFailed { .. }
                | ProtocolError::AlreadyOpen
        )
    }
}
