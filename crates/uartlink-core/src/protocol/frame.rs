//! Frame encoding
//!
//! Wire format, all fields single bytes:
//! - Command frame: `[HEADER][COMMAND]`
//! - Data frame:    `[HEADER][LENGTH][PAYLOAD x LENGTH]`
//!
//! There is no type discriminator on the wire. Sender and receiver agree on
//! the shape by calling the matching command or data operation, so [`Frame`]
//! only exists on this side of the link.

use super::{ProtocolError, FRAME_OVERHEAD};

/// One frame, before encoding or after decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Header followed by a single command byte
    Command(u8),
    /// Header followed by a length byte and the payload
    Data(Vec<u8>),
}

impl Frame {
    /// Encoded length including the header
    pub fn encoded_size(&self) -> usize {
        match self {
            Frame::Command(_) => FRAME_OVERHEAD,
            Frame::Data(payload) => FRAME_OVERHEAD + payload.len(),
        }
    }

    /// Append the encoded frame to `out`.
    ///
    /// Data frames longer than `max_packet_size` are refused and `out` is
    /// left untouched.
    pub fn encode_into(
        &self,
        header: u8,
        max_packet_size: u8,
        out: &mut Vec<u8>,
    ) -> Result<(), ProtocolError> {
        match self {
            Frame::Command(command) => encode_command(header, *command, out),
            Frame::Data(payload) => encode_data(header, max_packet_size, payload, out)?,
        }
        Ok(())
    }

    /// Encode into a fresh buffer
    pub fn to_bytes(&self, header: u8, max_packet_size: u8) -> Result<Vec<u8>, ProtocolError> {
        let mut out = Vec::with_capacity(self.encoded_size());
        self.encode_into(header, max_packet_size, &mut out)?;
        Ok(out)
    }
}

/// Append `[header, command]` to `out`
pub fn encode_command(header: u8, command: u8, out: &mut Vec<u8>) {
    out.push(header);
    out.push(command);
}

/// Append `[header, len, payload...]` to `out`
pub fn encode_data(
    header: u8,
    max_packet_size: u8,
    payload: &[u8],
    out: &mut Vec<u8>,
) -> Result<(), ProtocolError> {
    let length = check_length(payload.len(), max_packet_size)?;
    out.reserve(FRAME_OVERHEAD + payload.len());
    out.push(header);
    out.push(length);
    out.extend_from_slice(payload);
    Ok(())
}

/// Validate a payload length against the packet bound, returning it as the
/// wire length byte
pub fn check_length(length: usize, max_packet_size: u8) -> Result<u8, ProtocolError> {
    if length > max_packet_size as usize {
        return Err(ProtocolError::PacketTooLarge {
            length,
            max: max_packet_size,
        });
    }
    // max_packet_size is a u8, so this cannot truncate
    Ok(length as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_command_frame_layout() {
        let bytes = Frame::Command(0x05).to_bytes(0xAA, 100).unwrap();
        assert_eq!(bytes, vec![0xAA, 0x05]);
    }

    #[test]
    fn test_data_frame_layout() {
        let bytes = Frame::Data(vec![1, 2, 3]).to_bytes(0xAA, 100).unwrap();
        assert_eq!(bytes, vec![0xAA, 3, 1, 2, 3]);
    }

    #[test]
    fn test_empty_data_frame() {
        let bytes = Frame::Data(Vec::new()).to_bytes(0x7E, 100).unwrap();
        assert_eq!(bytes, vec![0x7E, 0]);
    }

    #[test]
    fn test_header_inside_payload_is_not_escaped() {
        let bytes = Frame::Data(vec![0xAA, 0xAA]).to_bytes(0xAA, 100).unwrap();
        assert_eq!(bytes, vec![0xAA, 2, 0xAA, 0xAA]);
    }

    #[test]
    fn test_oversized_payload_refused() {
        let mut out = vec![0x01];
        let result = encode_data(0xAA, 4, &[0u8; 5], &mut out);
        assert!(matches!(
            result,
            Err(ProtocolError::PacketTooLarge { length: 5, max: 4 })
        ));
        assert_eq!(out, vec![0x01]);
    }

    #[test]
    fn test_max_sized_payload_accepted() {
        let payload = vec![0x42; 255];
        let bytes = Frame::Data(payload.clone()).to_bytes(0xAA, 255).unwrap();
        assert_eq!(bytes.len(), 257);
        assert_eq!(bytes[1], 255);
        assert_eq!(&bytes[2..], payload.as_slice());
    }

    #[test]
    fn test_encoded_size() {
        assert_eq!(Frame::Command(1).encoded_size(), 2);
        assert_eq!(Frame::Data(vec![0; 10]).encoded_size(), 12);
    }
}
