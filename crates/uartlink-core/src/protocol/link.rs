//! Link management
//!
//! Owns the device handle and runs the framing protocol over it.

use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::{
    frame::{self, Frame},
    serial::open_port,
    stream::{CommunicationChannel, SerialChannel},
    LinkConfig, ProtocolError,
};

/// Link state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    /// No device handle held
    Closed,
    /// Device open and configured
    Open,
}

/// Cumulative traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStats {
    /// Bytes written, framing included
    pub tx_bytes: u64,
    /// Bytes read, framing and discarded bytes included
    pub rx_bytes: u64,
    /// Frames written
    pub tx_frames: u64,
    /// Complete frames received
    pub rx_frames: u64,
    /// Bytes dropped while resynchronising or draining rejected payloads
    pub discarded_bytes: u64,
}

/// Framed command/data link over a serial device.
///
/// Every I/O operation takes `&mut self`; a link is driven from one thread
/// at a time. Command and data frames are indistinguishable on the wire, so
/// each read must match what the peer sent: `read_command` for
/// `send_command`, `read_data` for `send_data`.
pub struct UartLink {
    /// Open transport, if any
    channel: Option<Box<dyn CommunicationChannel>>,
    state: LinkState,
    config: LinkConfig,
    /// Scratch buffer frames are assembled in before writing
    tx_buf: Vec<u8>,
    stats: LinkStats,
}

impl UartLink {
    /// Create a new link (not yet open)
    pub fn new(config: LinkConfig) -> Self {
        let tx_buf = Vec::with_capacity(config.buffer_size as usize);
        Self {
            channel: None,
            state: LinkState::Closed,
            config,
            tx_buf,
            stats: LinkStats::default(),
        }
    }

    /// Create a link and open its device
    pub fn open(config: LinkConfig) -> Result<Self, ProtocolError> {
        let mut link = Self::new(config);
        link.begin()?;
        Ok(link)
    }

    /// Create an open link over an already established transport.
    ///
    /// The configured read timeout is applied to the channel.
    pub fn with_channel(
        config: LinkConfig,
        channel: Box<dyn CommunicationChannel>,
    ) -> Result<Self, ProtocolError> {
        config.validate()?;
        let mut link = Self::new(config);
        link.attach(channel)?;
        Ok(link)
    }

    /// Open and configure the device named in the configuration.
    ///
    /// Fails with [`ProtocolError::AlreadyOpen`] if the link already holds a
    /// handle; the existing handle is kept.
    pub fn begin(&mut self) -> Result<(), ProtocolError> {
        if self.channel.is_some() {
            return Err(ProtocolError::AlreadyOpen);
        }
        self.config.validate()?;

        let port = open_port(&self.config)?;
        let mut channel = SerialChannel::new(port);
        // Drop whatever the peer sent before we were listening
        channel
            .clear_buffers()
            .map_err(|e| ProtocolError::OpenFailed {
                device: self.config.device.clone(),
                reason: e.to_string(),
            })?;

        self.attach(Box::new(channel))?;
        debug!(
            device = %self.config.device,
            baud = self.config.baud_rate,
            header = format_args!("{:#04x}", self.config.header),
            "link open"
        );
        Ok(())
    }

    fn attach(&mut self, mut channel: Box<dyn CommunicationChannel>) -> Result<(), ProtocolError> {
        if self.channel.is_some() {
            return Err(ProtocolError::AlreadyOpen);
        }
        channel
            .set_timeout(self.read_timeout())
            .map_err(|e| ProtocolError::OpenFailed {
                device: self.config.device.clone(),
                reason: e.to_string(),
            })?;
        self.channel = Some(channel);
        self.state = LinkState::Open;
        Ok(())
    }

    /// Release the device handle. Calling this on a closed link does nothing.
    pub fn close(&mut self) {
        if let Some(channel) = self.channel.take() {
            drop(channel);
            debug!(device = %self.config.device, "link closed");
        }
        self.state = LinkState::Closed;
    }

    /// Get current link state
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// True while a device handle is held
    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    /// Configuration the link was built with
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Get cumulative traffic counters
    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.config.read_timeout_ms)
    }

    /// Send a command frame: `[header, command]`
    pub fn send_command(&mut self, command: u8) -> Result<(), ProtocolError> {
        self.ensure_open()?;
        self.tx_buf.clear();
        frame::encode_command(self.config.header, command, &mut self.tx_buf);
        trace!(command = format_args!("{:#04x}", command), "send command");
        self.transmit()
    }

    /// Send a data frame: `[header, len, payload...]`.
    ///
    /// Payloads longer than `max_packet_size` are refused with
    /// [`ProtocolError::PacketTooLarge`] and nothing is written.
    pub fn send_data(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        self.ensure_open()?;
        self.tx_buf.clear();
        frame::encode_data(
            self.config.header,
            self.config.max_packet_size,
            payload,
            &mut self.tx_buf,
        )?;
        trace!(len = payload.len(), "send data");
        self.transmit()
    }

    /// Send either frame shape
    pub fn send_frame(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        match frame {
            Frame::Command(command) => self.send_command(*command),
            Frame::Data(payload) => self.send_data(payload),
        }
    }

    fn ensure_open(&self) -> Result<(), ProtocolError> {
        if self.channel.is_none() {
            return Err(ProtocolError::NotConnected);
        }
        Ok(())
    }

    fn transmit(&mut self) -> Result<(), ProtocolError> {
        let channel = self.channel.as_mut().ok_or(ProtocolError::NotConnected)?;

        // write_all loops over partial writes. No flush: on a tty that is
        // tcdrain, which can stall on some USB adapters.
        channel.write_all(&self.tx_buf).map_err(|e| {
            warn!("write of {} bytes failed: {}", self.tx_buf.len(), e);
            ProtocolError::WriteFailed(e.to_string())
        })?;

        self.stats.tx_bytes = self.stats.tx_bytes.saturating_add(self.tx_buf.len() as u64);
        self.stats.tx_frames = self.stats.tx_frames.saturating_add(1);
        Ok(())
    }

    /// Wait indefinitely for a command frame and return its command byte.
    ///
    /// Bytes before the header are discarded.
    pub fn read_command(&mut self) -> Result<u8, ProtocolError> {
        self.receive_command(None)
    }

    /// Like [`read_command`](Self::read_command), but gives up with
    /// [`ProtocolError::Timeout`] once `timeout` has elapsed. A stream that
    /// ends before then still reports [`ProtocolError::Incomplete`].
    pub fn read_command_timeout(&mut self, timeout: Duration) -> Result<u8, ProtocolError> {
        self.receive_command(deadline_after(timeout))
    }

    /// Wait indefinitely for a data frame and copy its payload into `buf`,
    /// returning the payload length.
    ///
    /// A declared length larger than `buf` fails with
    /// [`ProtocolError::BufferOverflow`]; nothing is written past `buf`.
    pub fn read_data(&mut self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        self.receive_data(buf, None)
    }

    /// Like [`read_data`](Self::read_data), with one `timeout` budget shared
    /// by header search, length byte and payload.
    pub fn read_data_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, ProtocolError> {
        self.receive_data(buf, deadline_after(timeout))
    }

    /// Wait indefinitely for a data frame and return its payload
    pub fn read_data_vec(&mut self) -> Result<Vec<u8>, ProtocolError> {
        self.receive_data_vec(None)
    }

    /// Bounded variant of [`read_data_vec`](Self::read_data_vec)
    pub fn read_data_vec_timeout(&mut self, timeout: Duration) -> Result<Vec<u8>, ProtocolError> {
        self.receive_data_vec(deadline_after(timeout))
    }

    fn receive_data_vec(&mut self, deadline: Option<Instant>) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = vec![0u8; self.config.max_packet_size as usize];
        let len = self.receive_data(&mut buf, deadline)?;
        buf.truncate(len);
        Ok(buf)
    }

    fn reader(&mut self, deadline: Option<Instant>) -> Result<FrameReader<'_>, ProtocolError> {
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let device_timeout = self.read_timeout();
        let channel = self.channel.as_mut().ok_or(ProtocolError::NotConnected)?;
        Ok(FrameReader {
            channel: &mut **channel,
            deadline,
            poll_interval,
            device_timeout,
            timeout_lowered: false,
            stats: &mut self.stats,
        })
    }

    fn receive_command(&mut self, deadline: Option<Instant>) -> Result<u8, ProtocolError> {
        let header = self.config.header;
        let mut reader = self.reader(deadline)?;
        reader.sync(header)?;
        let command = reader.read_byte()?;
        reader.frame_done();

        trace!(
            command = format_args!("{:#04x}", command),
            "received command"
        );
        Ok(command)
    }

    fn receive_data(
        &mut self,
        buf: &mut [u8],
        deadline: Option<Instant>,
    ) -> Result<usize, ProtocolError> {
        let header = self.config.header;
        let max = self.config.max_packet_size;
        let mut reader = self.reader(deadline)?;
        reader.sync(header)?;
        let declared = reader.read_byte()? as usize;

        let rejection = if declared > max as usize {
            Some(ProtocolError::PacketTooLarge {
                length: declared,
                max,
            })
        } else if declared > buf.len() {
            Some(ProtocolError::BufferOverflow {
                declared,
                capacity: buf.len(),
            })
        } else {
            None
        };

        if let Some(err) = rejection {
            // Skip the payload so the next read starts on a frame boundary
            if let Err(drain_err) = reader.drain(declared) {
                debug!("drain after rejected frame stopped early: {}", drain_err);
            }
            warn!("rejected data frame: {}", err);
            return Err(err);
        }

        reader.fill(&mut buf[..declared])?;
        reader.frame_done();

        trace!(len = declared, "received data");
        Ok(declared)
    }
}

impl Drop for UartLink {
    fn drop(&mut self) {
        self.close();
    }
}

fn deadline_after(timeout: Duration) -> Option<Instant> {
    // An unrepresentable deadline is as good as none
    Instant::now().checked_add(timeout)
}

/// Reads bytes for one frame, honouring an optional deadline.
///
/// Bounded reads shorten the channel's device timeout to the poll interval;
/// the configured value is put back on drop.
struct FrameReader<'a> {
    channel: &'a mut dyn CommunicationChannel,
    deadline: Option<Instant>,
    poll_interval: Duration,
    device_timeout: Duration,
    timeout_lowered: bool,
    stats: &'a mut LinkStats,
}

impl FrameReader<'_> {
    /// Consume bytes up to and including the next header byte
    fn sync(&mut self, header: u8) -> Result<(), ProtocolError> {
        let mut skipped = 0u64;
        let result = loop {
            match self.read_byte() {
                Ok(byte) if byte == header => break Ok(()),
                Ok(_) => skipped += 1,
                Err(e) => break Err(e),
            }
        };
        if skipped > 0 {
            trace!(skipped, "discarded bytes before header");
            self.stats.discarded_bytes = self.stats.discarded_bytes.saturating_add(skipped);
        }
        result
    }

    fn read_byte(&mut self) -> Result<u8, ProtocolError> {
        let mut byte = [0u8; 1];
        self.fill(&mut byte)?;
        Ok(byte[0])
    }

    /// Read and throw away `len` bytes
    fn drain(&mut self, mut len: usize) -> Result<(), ProtocolError> {
        let mut scratch = [0u8; 64];
        while len > 0 {
            let n = len.min(scratch.len());
            self.fill(&mut scratch[..n])?;
            self.stats.discarded_bytes = self.stats.discarded_bytes.saturating_add(n as u64);
            len -= n;
        }
        Ok(())
    }

    /// Fill all of `buf`
    fn fill(&mut self, buf: &mut [u8]) -> Result<(), ProtocolError> {
        let mut offset = 0;
        while offset < buf.len() {
            let n = match self.deadline {
                None => self.read_some(&mut buf[offset..])?,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ProtocolError::Timeout);
                    }

                    let available = self.available()?;
                    if available == 0 {
                        // Short read instead of a sleep: a closed stream
                        // reports EOF here rather than running out the budget
                        self.lower_timeout(self.poll_interval.min(deadline - now))?;
                        self.read_some(&mut buf[offset..offset + 1])?
                    } else {
                        let to_read = available.min(buf.len() - offset);
                        self.read_some(&mut buf[offset..offset + to_read])?
                    }
                }
            };
            offset += n;
            self.stats.rx_bytes = self.stats.rx_bytes.saturating_add(n as u64);
        }
        Ok(())
    }

    fn available(&mut self) -> Result<usize, ProtocolError> {
        let n = self
            .channel
            .bytes_to_read()
            .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
        Ok(n as usize)
    }

    fn lower_timeout(&mut self, wait: Duration) -> Result<(), ProtocolError> {
        self.channel
            .set_timeout(wait)
            .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
        self.timeout_lowered = true;
        Ok(())
    }

    /// One read call. Device-level timeouts count as zero bytes.
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        match self.channel.read(buf) {
            Ok(0) => Err(ProtocolError::Incomplete),
            Ok(n) => Ok(n),
            Err(ref e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(e) => Err(ProtocolError::IoError(e)),
        }
    }

    fn frame_done(&mut self) {
        self.stats.rx_frames = self.stats.rx_frames.saturating_add(1);
    }
}

impl Drop for FrameReader<'_> {
    fn drop(&mut self) {
        if self.timeout_lowered {
            if let Err(e) = self.channel.set_timeout(self.device_timeout) {
                warn!("failed to restore device read timeout: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_link_is_closed() {
        let link = UartLink::new(LinkConfig::default());
        assert_eq!(link.state(), LinkState::Closed);
        assert!(!link.is_open());
        assert_eq!(link.stats(), LinkStats::default());
    }

    #[test]
    fn test_io_on_closed_link() {
        let mut link = UartLink::new(LinkConfig::default());
        assert!(matches!(
            link.send_command(0x01),
            Err(ProtocolError::NotConnected)
        ));
        assert!(matches!(
            link.send_data(&[1, 2, 3]),
            Err(ProtocolError::NotConnected)
        ));
        assert!(matches!(
            link.read_command_timeout(Duration::from_millis(10)),
            Err(ProtocolError::NotConnected)
        ));
        let mut buf = [0u8; 4];
        assert!(matches!(
            link.read_data(&mut buf),
            Err(ProtocolError::NotConnected)
        ));
    }

    #[test]
    fn test_close_twice() {
        let mut link = UartLink::new(LinkConfig::default());
        link.close();
        link.close();
        assert_eq!(link.state(), LinkState::Closed);
    }

    #[test]
    fn test_begin_missing_device() {
        let mut link = UartLink::new(LinkConfig::for_device("/dev/uartlink-missing"));
        let err = link.begin().unwrap_err();
        assert!(err.is_open_error());
        assert!(!link.is_open());
        assert_eq!(link.state(), LinkState::Closed);
    }

    #[test]
    fn test_begin_invalid_config() {
        let config = LinkConfig::default().with_baud_rate(1234);
        assert!(matches!(
            UartLink::open(config),
            Err(ProtocolError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_deadline_overflow_is_unbounded() {
        assert!(deadline_after(Duration::MAX).is_none());
        assert!(deadline_after(Duration::from_millis(5)).is_some());
    }
}
