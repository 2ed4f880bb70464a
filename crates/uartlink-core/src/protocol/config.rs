//! Link configuration
//!
//! Parameters fixed at construction time: which device to open, how fast to
//! talk to it, and the framing constants both ends must agree on.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_BUFFER_SIZE, DEFAULT_DEVICE, DEFAULT_HEADER,
    DEFAULT_MAX_PACKET_SIZE, DEFAULT_POLL_INTERVAL_MS, DEFAULT_READ_TIMEOUT_MS, FRAME_OVERHEAD,
};

/// Baud rates with a termios `Bxxx` constant on Linux
pub const STANDARD_BAUD_RATES: &[u32] = &[
    50, 75, 110, 134, 150, 200, 300, 600, 1200, 1800, 2400, 4800, 9600, 19200, 38400, 57600,
    115200, 230400, 460800, 500000, 576000, 921600, 1000000, 1152000, 1500000, 2000000, 2500000,
    3000000, 3500000, 4000000,
];

/// Returns true if `baud` is one of [`STANDARD_BAUD_RATES`]
pub fn is_standard_baud_rate(baud: u32) -> bool {
    STANDARD_BAUD_RATES.binary_search(&baud).is_ok()
}

/// Link configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial device path (e.g. "/dev/ttyUSB0")
    pub device: String,
    /// Baud rate, applied to both directions
    pub baud_rate: u32,
    /// Size of the internal scratch buffer
    pub buffer_size: u16,
    /// Synchronisation byte sent before every frame
    pub header: u8,
    /// Largest payload a single data frame may carry
    pub max_packet_size: u8,
    /// Device-level read timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Sleep between availability polls during bounded reads, in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            header: DEFAULT_HEADER,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl LinkConfig {
    /// Default configuration for the given device
    pub fn for_device(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Self::default()
        }
    }

    /// Builder-style baud rate override
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Builder-style header override
    pub fn with_header(mut self, header: u8) -> Self {
        self.header = header;
        self
    }

    /// Builder-style max packet size override
    pub fn with_max_packet_size(mut self, max_packet_size: u8) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    /// Parse a JSON configuration. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ProtocolError> {
        let config: LinkConfig =
            serde_json::from_str(json).map_err(|e| ProtocolError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Check the invariants a link relies on
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.device.trim().is_empty() {
            return Err(ProtocolError::InvalidConfig(
                "device path is empty".to_string(),
            ));
        }
        if !is_standard_baud_rate(self.baud_rate) {
            return Err(ProtocolError::InvalidConfig(format!(
                "unsupported baud rate {}",
                self.baud_rate
            )));
        }
        if self.buffer_size == 0 {
            return Err(ProtocolError::InvalidConfig(
                "buffer size must be greater than zero".to_string(),
            ));
        }
        let needed = self.max_packet_size as usize + FRAME_OVERHEAD;
        if (self.buffer_size as usize) < needed {
            return Err(ProtocolError::InvalidConfig(format!(
                "buffer size {} cannot hold a {}-byte packet plus framing ({} bytes)",
                self.buffer_size, self.max_packet_size, needed
            )));
        }
        if self.read_timeout_ms == 0 {
            return Err(ProtocolError::InvalidConfig(
                "read timeout must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ProtocolError::InvalidConfig(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = LinkConfig::default();
        assert_eq!(config.device, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.buffer_size, 1024);
        assert_eq!(config.header, 0xAA);
        assert_eq!(config.max_packet_size, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_baud_table_is_sorted() {
        let mut sorted = STANDARD_BAUD_RATES.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, STANDARD_BAUD_RATES.to_vec());
        assert!(is_standard_baud_rate(9600));
        assert!(!is_standard_baud_rate(12345));
    }

    #[test]
    fn test_rejects_nonstandard_baud() {
        let config = LinkConfig::default().with_baud_rate(100_000);
        assert!(matches!(
            config.validate(),
            Err(ProtocolError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_small_buffer() {
        let mut config = LinkConfig::default().with_max_packet_size(255);
        config.buffer_size = 256;
        assert!(config.validate().is_err());
        config.buffer_size = 257;
        assert!(config.validate().is_ok());

        config.buffer_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_device() {
        let config = LinkConfig::for_device("  ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_partial_uses_defaults() {
        let config =
            LinkConfig::from_json_str(r#"{"device": "/dev/ttyACM0", "header": 85}"#).unwrap();
        assert_eq!(config.device, "/dev/ttyACM0");
        assert_eq!(config.header, 0x55);
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.max_packet_size, DEFAULT_MAX_PACKET_SIZE);
    }

    #[test]
    fn test_json_invalid_values_rejected() {
        assert!(LinkConfig::from_json_str(r#"{"baud_rate": 7}"#).is_err());
        assert!(LinkConfig::from_json_str(r#"{"max_packet_size": 300}"#).is_err());
        assert!(LinkConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_json_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("link.json");
        let config = LinkConfig::for_device("/dev/ttyS1")
            .with_baud_rate(57600)
            .with_header(0x7E);
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = LinkConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_json_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let result = LinkConfig::from_json_file(dir.path().join("absent.json"));
        assert!(matches!(result, Err(ProtocolError::IoError(_))));
    }
}
