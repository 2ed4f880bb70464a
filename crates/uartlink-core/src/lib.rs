//! # uartlink Core Library
//!
//! Framed command/data exchange over a serial (UART) link on Linux.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Serial device setup (exclusive, raw 8N1, standard baud rates)
//! - Command frames (`[HEADER][COMMAND]`) and data frames
//!   (`[HEADER][LENGTH][PAYLOAD]`)
//! - Blocking and timeout-bounded receives that resynchronise on the header
//! - Port discovery and traffic counters
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use uartlink_core::protocol::{LinkConfig, UartLink};
//!
//! let mut link = UartLink::open(LinkConfig::for_device("/dev/ttyUSB0"))?;
//! link.send_command(0x01)?;
//! let reply = link.read_command_timeout(Duration::from_millis(200))?;
//! println!("reply: {reply:#04x}");
//! link.close();
//! # Ok::<(), uartlink_core::protocol::ProtocolError>(())
//! ```

pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::protocol::{Frame, LinkConfig, LinkState, LinkStats, ProtocolError, UartLink};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
