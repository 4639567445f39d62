//! RTP fixed-header codec.
//!
//! Packet layout (all multi-byte fields network byte order):
//!
//! ```text
//! +------+------+---------+-------------+---------+----------+
//! | 0x80 | 0x00 | seq u16 | timestamp u32 | ssrc u32 | payload |
//! +------+------+---------+-------------+---------+----------+
//! ```
//!
//! The two marker bytes are fixed: version 2, no padding/extension/CSRC,
//! payload type 0. [`unpack`] rejects anything else as foreign.
//!
//! The timestamp is the sender's accumulated *playing time* in
//! milliseconds — monotonic while the stream plays, frozen across pauses.
//! It is not wall clock. Sequence numbers wrap at 16 bits.

use crate::error::{ParseErrorKind, Result};

/// Fixed header length in bytes.
pub const RTP_HEADER_LEN: usize = 12;

/// Leading marker bytes of every packet.
const RTP_MARKER: [u8; 2] = [0x80, 0x00];

/// RTP fixed-header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub seq: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

/// A decoded RTP packet.
#[derive(Debug, PartialEq, Eq)]
pub struct RtpPacket {
    pub header: RtpHeader,
    pub payload: Vec<u8>,
}

/// Serialize a header and payload into one wire packet.
///
/// Fails with [`ParseErrorKind::RtpOverflow`] when header plus payload
/// would exceed `max_size`.
pub fn pack(header: &RtpHeader, payload: &[u8], max_size: usize) -> Result<Vec<u8>> {
    if max_size < RTP_HEADER_LEN || payload.len() > max_size - RTP_HEADER_LEN {
        return Err(ParseErrorKind::RtpOverflow.into());
    }

    let mut packet = Vec::with_capacity(RTP_HEADER_LEN + payload.len());
    packet.extend_from_slice(&RTP_MARKER);
    packet.extend_from_slice(&header.seq.to_be_bytes());
    packet.extend_from_slice(&header.timestamp.to_be_bytes());
    packet.extend_from_slice(&header.ssrc.to_be_bytes());
    packet.extend_from_slice(payload);
    Ok(packet)
}

/// Parse one wire packet. The payload length is implicit: everything past
/// the 12-byte header.
pub fn unpack(packet: &[u8]) -> Result<RtpPacket> {
    if packet.len() < RTP_HEADER_LEN {
        return Err(ParseErrorKind::RtpTruncated.into());
    }
    if packet[0..2] != RTP_MARKER {
        return Err(ParseErrorKind::RtpBadMarker.into());
    }

    let header = RtpHeader {
        seq: u16::from_be_bytes([packet[2], packet[3]]),
        timestamp: u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]),
        ssrc: u32::from_be_bytes([packet[8], packet[9], packet[10], packet[11]]),
    };
    Ok(RtpPacket {
        header,
        payload: packet[RTP_HEADER_LEN..].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let header = RtpHeader {
            seq: 1,
            timestamp: 100,
            ssrc: 1000,
        };
        let payload = vec![b'a'; 100];
        let packet = pack(&header, &payload, 512).unwrap();
        assert_eq!(packet.len(), RTP_HEADER_LEN + 100);

        let decoded = unpack(&packet).unwrap();
        assert_eq!(decoded.header, header);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn wire_layout_is_big_endian() {
        let header = RtpHeader {
            seq: 0x0102,
            timestamp: 0x0304_0506,
            ssrc: 0x0708_090A,
        };
        let packet = pack(&header, &[0xFF], 64).unwrap();
        assert_eq!(
            packet,
            [0x80, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0xFF]
        );
    }

    #[test]
    fn pack_rejects_oversized_payload() {
        let header = RtpHeader {
            seq: 0,
            timestamp: 0,
            ssrc: 0,
        };
        let payload = vec![0u8; 101];
        assert!(pack(&header, &payload, 112).is_err());
        assert!(pack(&header, &payload[..100], 112).is_ok());
        assert!(pack(&header, &[], RTP_HEADER_LEN - 1).is_err());
    }

    #[test]
    fn unpack_rejects_short_packet() {
        assert!(unpack(&[0x80, 0x00, 0x01]).is_err());
    }

    #[test]
    fn unpack_rejects_foreign_marker() {
        let mut packet = pack(
            &RtpHeader {
                seq: 1,
                timestamp: 2,
                ssrc: 3,
            },
            b"x",
            64,
        )
        .unwrap();
        packet[1] = 0x60;
        assert!(unpack(&packet).is_err());
    }

    #[test]
    fn empty_payload_round_trips() {
        let header = RtpHeader {
            seq: u16::MAX,
            timestamp: u32::MAX,
            ssrc: 0,
        };
        let packet = pack(&header, &[], 512).unwrap();
        let decoded = unpack(&packet).unwrap();
        assert_eq!(decoded.header, header);
        assert!(decoded.payload.is_empty());
    }
}
