//! UART Framing Protocol
//!
//! Header-synchronised command and data frames over a serial device.
//!
//! ```text
//! Command frame: [HEADER][COMMAND]
//! Data frame:    [HEADER][LENGTH][PAYLOAD x LENGTH]
//! ```

mod config;
mod error;
pub mod frame;
mod link;
pub mod serial;
pub mod stream;

pub use config::{is_standard_baud_rate, LinkConfig, STANDARD_BAUD_RATES};
pub use error::ProtocolError;
pub use frame::Frame;
pub use link::{LinkState, LinkStats, UartLink};
pub use serial::{list_ports, PortInfo};
pub use stream::{CommunicationChannel, SerialChannel};

/// Default serial device
pub const DEFAULT_DEVICE: &str = "/dev/ttyUSB0";

/// Default baud rate
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default scratch buffer size
pub const DEFAULT_BUFFER_SIZE: u16 = 1024;

/// Default frame header byte
pub const DEFAULT_HEADER: u8 = 0xAA;

/// Default maximum data-frame payload
pub const DEFAULT_MAX_PACKET_SIZE: u8 = 100;

/// Default device-level read timeout in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

/// Default sleep between availability polls in bounded reads
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2;

/// Header byte plus command or length byte
pub const FRAME_OVERHEAD: usize = 2;
