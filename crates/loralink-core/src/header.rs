//! Packet header framing
//!
//! Every addressed frame starts with a fixed-width, human-readable header
//! followed by the raw application bytes:
//!
//! ```text
//! ┌─────────────────────────────┬──────────────────────┐
//! │        Header (11B)         │   Payload (0-N B)    │
//! ├─────┬───┬─────┬───┬────┬────┤                      │
//! │ OOO │ - │ DDD │ - │ SS │ |  │  raw application     │
//! │     │   │     │   │    │    │  bytes               │
//! └─────┴───┴─────┴───┴────┴────┘──────────────────────┘
//!
//! OOO = origin address   (3 digits, zero padded, 0 = anonymous)
//! DDD = destination      (3 digits, zero padded, 0 = broadcast)
//! SS  = sequence id      (2 digits, zero padded, 1-99)
//! ```
//!
//! A frame whose first 11 bytes do not match the separator layout is a
//! legacy headerless packet; its entire payload is application data. There
//! is no checksum: separator-matching headers with non-digit field bytes
//! decode to whatever the leading digits yield.

use crate::error::{LinkError, LinkResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Header size on the wire in bytes
pub const HEADER_SIZE: usize = 11;

/// Highest assignable station address
pub const MAX_ADDRESS: u16 = 999;

/// Highest sequence id before wrapping back to 1
pub const MAX_SEQUENCE: u8 = 99;

/// The broadcast / anonymous address
pub const BROADCAST: u16 = 0;

/// Decoded frame header: origin, destination, and sequence id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    origin: u16,
    destination: u16,
    sequence: u8,
}

impl PacketHeader {
    /// Create a header, validating field ranges.
    ///
    /// Addresses must fit in three digits and the sequence id in two;
    /// callers keep addresses <= 999 and sequence ids <= 99 by contract.
    pub fn new(origin: u16, destination: u16, sequence: u8) -> LinkResult<Self> {
        if origin > MAX_ADDRESS {
            return Err(LinkError::InvalidAddress(origin));
        }
        if destination > MAX_ADDRESS {
            return Err(LinkError::InvalidAddress(destination));
        }
        if sequence > MAX_SEQUENCE {
            return Err(LinkError::InvalidSequence(sequence));
        }
        Ok(Self {
            origin,
            destination,
            sequence,
        })
    }

    /// Origin station address
    pub fn origin(&self) -> u16 {
        self.origin
    }

    /// Destination station address (0 = broadcast)
    pub fn destination(&self) -> u16 {
        self.destination
    }

    /// Sequence id
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Whether the frame is addressed to no one in particular
    pub fn is_broadcast(&self) -> bool {
        self.destination == BROADCAST
    }

    /// Serialize to the fixed 11-byte wire form
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let text = format!(
            "{:03}-{:03}-{:02}|",
            self.origin, self.destination, self.sequence
        );
        let mut bytes = [0u8; HEADER_SIZE];
        bytes.copy_from_slice(text.as_bytes());
        bytes
    }

    /// Try to decode a header from the front of a received payload.
    ///
    /// Returns `None` when the payload is shorter than 11 bytes or the
    /// separators (`-` at 3 and 7, `|` at 10) do not line up; the packet is
    /// then treated as headerless. Field bytes decode atoi-style: leading
    /// digits are accumulated and anything else ends the field at whatever
    /// value was reached.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < HEADER_SIZE {
            return None;
        }
        if payload[3] != b'-' || payload[7] != b'-' || payload[10] != b'|' {
            return None;
        }
        Some(Self {
            origin: decode_field(&payload[0..3]),
            destination: decode_field(&payload[4..7]),
            sequence: decode_field(&payload[8..10]) as u8,
        })
    }

    /// Prefix this header to application data, producing the wire frame
    pub fn frame(&self, data: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(HEADER_SIZE + data.len());
        frame.extend_from_slice(&self.encode());
        frame.extend_from_slice(data);
        frame
    }
}

impl fmt::Display for PacketHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:03}-{:03}-{:02}|",
            self.origin, self.destination, self.sequence
        )
    }
}

/// Accumulate leading ASCII digits, stopping at the first non-digit
fn decode_field(bytes: &[u8]) -> u16 {
    let mut value: u16 = 0;
    for &b in bytes {
        if !b.is_ascii_digit() {
            break;
        }
        value = value * 10 + (b - b'0') as u16;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let header = PacketHeader::new(5, 7, 3).unwrap();
        assert_eq!(&header.encode(), b"005-007-03|");

        let header = PacketHeader::new(999, 0, 99).unwrap();
        assert_eq!(&header.encode(), b"999-000-99|");
    }

    #[test]
    fn test_roundtrip() {
        for (origin, destination, sequence) in [(1, 2, 1), (5, 7, 3), (999, 998, 99), (0, 0, 1)] {
            let header = PacketHeader::new(origin, destination, sequence).unwrap();
            let decoded = PacketHeader::parse(&header.encode()).unwrap();
            assert_eq!(decoded, header);
        }
    }

    #[test]
    fn test_parse_short_payload() {
        assert!(PacketHeader::parse(b"").is_none());
        assert!(PacketHeader::parse(b"005-007-03").is_none()); // 10 bytes
    }

    #[test]
    fn test_parse_separator_mismatch() {
        assert!(PacketHeader::parse(b"005x007-03|data").is_none());
        assert!(PacketHeader::parse(b"005-007x03|data").is_none());
        assert!(PacketHeader::parse(b"005-007-03xdata").is_none());
    }

    #[test]
    fn test_parse_non_digit_fields() {
        // Separators match, fields are garbage: accepted with atoi semantics
        let header = PacketHeader::parse(b"0ab-cde-1f|data").unwrap();
        assert_eq!(header.origin(), 0);
        assert_eq!(header.destination(), 0);
        assert_eq!(header.sequence(), 1);
    }

    #[test]
    fn test_parse_ignores_trailing_data() {
        let header = PacketHeader::parse(b"012-345-67|hello world").unwrap();
        assert_eq!(header.origin(), 12);
        assert_eq!(header.destination(), 345);
        assert_eq!(header.sequence(), 67);
    }

    #[test]
    fn test_invalid_address_rejected() {
        assert_eq!(
            PacketHeader::new(1000, 7, 1),
            Err(LinkError::InvalidAddress(1000))
        );
        assert_eq!(
            PacketHeader::new(5, 1000, 1),
            Err(LinkError::InvalidAddress(1000))
        );
    }

    #[test]
    fn test_invalid_sequence_rejected() {
        assert_eq!(
            PacketHeader::new(5, 7, 100),
            Err(LinkError::InvalidSequence(100))
        );
    }

    #[test]
    fn test_frame_prefixes_header() {
        let header = PacketHeader::new(5, 7, 3).unwrap();
        let frame = header.frame(b"hello");
        assert_eq!(&frame[..HEADER_SIZE], b"005-007-03|");
        assert_eq!(&frame[HEADER_SIZE..], b"hello");
    }

    #[test]
    fn test_broadcast() {
        let header = PacketHeader::new(5, 0, 1).unwrap();
        assert!(header.is_broadcast());
        let header = PacketHeader::new(5, 7, 1).unwrap();
        assert!(!header.is_broadcast());
    }
}
