//! Serial port handling
//!
//! Opens the device behind a link and puts it into the state the framing
//! layer expects: exclusive, raw 8N1, no flow control, modem lines ignored.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::BTreeMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use super::{LinkConfig, ProtocolError};

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,

    /// Serial number (if available)
    pub serial_number: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                manufacturer: usb.manufacturer,
                product: usb.product,
                serial_number: usb.serial_number,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

/// Name prefixes of USB serial nodes, in listing order
const USB_TTY_PREFIXES: [&str; 2] = ["ttyACM", "ttyUSB"];

/// Orders by prefix rank, then numeric suffix, then basename. Names without
/// a known prefix rank last.
fn port_sort_key(name: &str) -> (usize, u32, &str) {
    let basename = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(name);
    USB_TTY_PREFIXES
        .iter()
        .enumerate()
        .find_map(|(rank, prefix)| {
            let index = basename.strip_prefix(prefix)?.parse().unwrap_or(u32::MAX);
            Some((rank, index, basename))
        })
        .unwrap_or((USB_TTY_PREFIXES.len(), 0, basename))
}

fn sort_ports(ports: &mut [PortInfo]) {
    ports.sort_by(|a, b| port_sort_key(&a.name).cmp(&port_sort_key(&b.name)));
}

/// USB serial nodes present under /dev. udev may not have reported them
/// (containers, minimal images).
#[cfg(target_os = "linux")]
fn dev_usb_ttys() -> Vec<String> {
    let Ok(entries) = fs::read_dir("/dev") else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| USB_TTY_PREFIXES.iter().any(|p| name.starts_with(p)))
        .map(|name| format!("/dev/{name}"))
        .collect()
}

/// List available serial ports, one entry per device path, USB ports first
pub fn list_ports() -> Vec<PortInfo> {
    let mut found: BTreeMap<String, PortInfo> = BTreeMap::new();
    match serialport::available_ports() {
        Ok(ports) => found.extend(
            ports
                .into_iter()
                .map(PortInfo::from)
                .map(|p| (p.name.clone(), p)),
        ),
        Err(e) => warn!("port enumeration failed: {e}"),
    }

    #[cfg(target_os = "linux")]
    for name in dev_usb_ttys() {
        found
            .entry(name.clone())
            .or_insert_with(|| PortInfo::bare(name));
    }

    let mut ports: Vec<PortInfo> = found.into_values().collect();
    sort_ports(&mut ports);
    debug!(count = ports.len(), "listed serial ports");
    ports
}

fn map_open_error(device: &str, e: serialport::Error) -> ProtocolError {
    match e.kind() {
        serialport::ErrorKind::NoDevice => ProtocolError::PortNotFound(device.to_string()),
        serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
            ProtocolError::PortNotFound(device.to_string())
        }
        _ => ProtocolError::OpenFailed {
            device: device.to_string(),
            reason: e.to_string(),
        },
    }
}

/// Open the configured device in raw 8N1 mode with the configured baud rate
/// and device-level read timeout.
///
/// The port is dropped (closing the descriptor) if any later step fails.
pub fn open_port(config: &LinkConfig) -> Result<Box<dyn SerialPort>, ProtocolError> {
    debug!(
        device = %config.device,
        baud = config.baud_rate,
        timeout_ms = config.read_timeout_ms,
        "opening serial port"
    );

    let builder = serialport::new(&config.device, config.baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(Duration::from_millis(config.read_timeout_ms));

    #[cfg(unix)]
    let port: Box<dyn SerialPort> = {
        let mut native = builder
            .open_native()
            .map_err(|e| map_open_error(&config.device, e))?;
        native
            .set_exclusive(true)
            .map_err(|e| map_open_error(&config.device, e))?;
        Box::new(native)
    };

    #[cfg(not(unix))]
    let port = builder
        .open()
        .map_err(|e| map_open_error(&config.device, e))?;

    Ok(port)
}
