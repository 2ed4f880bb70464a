//! UART Link Probe
//!
//! Opens a serial port, sends one command frame and waits for a command
//! frame in reply. Useful for checking wiring, baud rate and header byte
//! against a peer before writing application code.
//!
//! Usage:
//!   cargo run --example uart_probe -- [OPTIONS] [PORT]
//!
//! Options:
//!   --port PORT       Serial port (default: /dev/ttyUSB0)
//!   --baud RATE       Baud rate (default: 115200)
//!   --header BYTE     Header byte, decimal or 0x-prefixed hex (default: 0xAA)
//!   --command BYTE    Command byte to send (default: 0x01)
//!   --timeout MS      Reply timeout in ms (default: 1000)
//!   --data            Expect a data frame reply instead of a command
//!   --list            List serial ports and exit
//!
//! Set RUST_LOG=uartlink_core=trace to see every frame.

use anyhow::{bail, Context, Result};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use uartlink_core::protocol::{list_ports, LinkConfig, UartLink};

fn parse_byte(s: &str) -> Result<u8> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse::<u8>(),
    };
    parsed.with_context(|| format!("invalid byte value '{}'", s))
}

fn print_help() {
    println!("UART Link Probe");
    println!();
    println!("Usage: uart_probe [OPTIONS] [PORT]");
    println!();
    println!("Options:");
    println!("  --port, -p PORT     Serial port (default: /dev/ttyUSB0)");
    println!("  --baud, -b RATE     Baud rate (default: 115200)");
    println!("  --header BYTE       Header byte (default: 0xAA)");
    println!("  --command, -c BYTE  Command byte to send (default: 0x01)");
    println!("  --timeout, -t MS    Reply timeout (default: 1000)");
    println!("  --data              Expect a data frame reply");
    println!("  --list              List serial ports and exit");
    println!("  --help, -h          Show this help");
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut config = LinkConfig::default();
    let mut command = 0x01u8;
    let mut timeout_ms = 1000u64;
    let mut expect_data = false;

    let mut i = 1;
    while i < args.len() {
        let value = || {
            args.get(i + 1)
                .map(String::as_str)
                .with_context(|| format!("{} needs a value", args[i]))
        };
        match args[i].as_str() {
            "--port" | "-p" => {
                config.device = value()?.to_string();
                i += 1;
            }
            "--baud" | "-b" => {
                config.baud_rate = value()?.parse().context("invalid baud rate")?;
                i += 1;
            }
            "--header" => {
                config.header = parse_byte(value()?)?;
                i += 1;
            }
            "--command" | "-c" => {
                command = parse_byte(value()?)?;
                i += 1;
            }
            "--timeout" | "-t" => {
                timeout_ms = value()?.parse().context("invalid timeout")?;
                i += 1;
            }
            "--data" => expect_data = true,
            "--list" => {
                let ports = list_ports();
                if ports.is_empty() {
                    println!("No serial ports found");
                }
                for port in ports {
                    match (port.vid, port.pid) {
                        (Some(vid), Some(pid)) => println!(
                            "{}  {:04x}:{:04x}  {}",
                            port.name,
                            vid,
                            pid,
                            port.product.unwrap_or_default()
                        ),
                        _ => println!("{}", port.name),
                    }
                }
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            arg if !arg.starts_with('-') => config.device = arg.to_string(),
            other => bail!("unknown option: {}", other),
        }
        i += 1;
    }

    println!("Configuration:");
    println!("  Port:       {}", config.device);
    println!("  Baud rate:  {}", config.baud_rate);
    println!("  Header:     {:#04x}", config.header);
    println!("  Command:    {:#04x}", command);
    println!("  Timeout:    {}ms", timeout_ms);
    println!();

    let mut link = UartLink::open(config.clone())
        .with_context(|| format!("failed to open {}", config.device))?;

    let start = Instant::now();
    link.send_command(command)?;
    let timeout = Duration::from_millis(timeout_ms);

    if expect_data {
        let payload = link.read_data_vec_timeout(timeout)?;
        println!(
            "Got {} byte payload in {:?}: {:02x?}",
            payload.len(),
            start.elapsed(),
            payload
        );
    } else {
        let reply = link.read_command_timeout(timeout)?;
        println!("Got command {:#04x} in {:?}", reply, start.elapsed());
    }

    let stats = link.stats();
    println!(
        "tx {} bytes / {} frames, rx {} bytes / {} frames, {} discarded",
        stats.tx_bytes, stats.tx_frames, stats.rx_bytes, stats.rx_frames, stats.discarded_bytes
    );
    link.close();
    Ok(())
}
